//! Render a [`ModelSpec`] to a Stan program.
//!
//! Output is deterministic and consists of exactly three named sections in
//! order: `data`, `parameters`, `model`. Golden-file tests pin the text.

use crate::model::{BinOp, Expr, FieldType, Likelihood, ModelSpec, Prior, Support};

/// Render the complete Stan program for a specification.
pub fn generate_stan(spec: &ModelSpec) -> String {
    let mut out = String::new();

    out.push_str("data {\n");
    out.push_str("  int<lower=1> N;\n");
    for field in &spec.data {
        match field.ty {
            FieldType::Real => out.push_str(&format!("  vector[N] {};\n", field.name)),
            FieldType::Count => {
                out.push_str(&format!("  array[N] int<lower=0> {};\n", field.name))
            }
        }
    }
    out.push_str("}\n");

    out.push_str("parameters {\n");
    for param in &spec.params {
        match param.support {
            Support::Real => out.push_str(&format!("  real {};\n", param.name)),
            Support::NonNegative => out.push_str(&format!("  real<lower=0> {};\n", param.name)),
        }
    }
    out.push_str("}\n");

    out.push_str("model {\n");
    for param in &spec.params {
        out.push_str(&format!(
            "  {} ~ {};\n",
            param.name,
            render_prior(&param.prior)
        ));
    }
    out.push('\n');
    match &spec.likelihood {
        Likelihood::Normal {
            response,
            mean,
            sd_param,
        } => {
            out.push_str(&format!(
                "  {} ~ normal({}, {});\n",
                response,
                render_expr(mean, 0),
                sd_param
            ));
        }
        Likelihood::Poisson { response, log_rate } => {
            // poisson_log applies the exp link inside the engine, which is
            // numerically stabler than poisson(exp(...)).
            out.push_str(&format!(
                "  {} ~ poisson_log({});\n",
                response,
                render_expr(log_rate, 0)
            ));
        }
    }
    out.push_str("}\n");

    out
}

fn render_prior(prior: &Prior) -> String {
    match prior {
        Prior::Normal { mean, sd } => format!("normal({}, {})", mean, sd),
        Prior::Exponential { rate } => format!("exponential({})", rate),
    }
}

fn precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Add | BinOp::Sub => 1,
        BinOp::Mul | BinOp::Div => 2,
    }
}

fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
    }
}

/// Precedence-aware rendering: parenthesize only where Stan would otherwise
/// parse the tree differently.
fn render_expr(expr: &Expr, parent: u8) -> String {
    match expr {
        Expr::Lit(v) => format!("{}", v),
        Expr::Data(name) | Expr::Param(name) => name.clone(),
        Expr::Binary(op, lhs, rhs) => {
            let prec = precedence(*op);
            // Sub and Div are left-associative; the right operand needs the
            // tighter binding.
            let rhs_prec = match op {
                BinOp::Sub | BinOp::Div => prec + 1,
                _ => prec,
            };
            let body = format!(
                "{} {} {}",
                render_expr(lhs, prec),
                symbol(*op),
                render_expr(rhs, rhs_prec)
            );
            if prec < parent {
                format!("({})", body)
            } else {
                body
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Expr;
    use crate::models::{gaussian_linear, poisson_loglinear};

    #[test]
    fn linear_predictor_renders_without_parens() {
        let expr = Expr::add(
            Expr::param("intercept"),
            Expr::mul(Expr::param("slope"), Expr::data("x")),
        );
        assert_eq!(render_expr(&expr, 0), "intercept + slope * x");
    }

    #[test]
    fn sum_under_product_is_parenthesized() {
        let expr = Expr::mul(
            Expr::add(Expr::param("a"), Expr::param("b")),
            Expr::data("x"),
        );
        assert_eq!(render_expr(&expr, 0), "(a + b) * x");
    }

    #[test]
    fn right_operand_of_sub_keeps_grouping() {
        let expr = Expr::binary(
            BinOp::Sub,
            Expr::param("a"),
            Expr::binary(BinOp::Sub, Expr::param("b"), Expr::param("c")),
        );
        assert_eq!(render_expr(&expr, 0), "a - (b - c)");
    }

    #[test]
    fn gaussian_program_has_three_sections_in_order() {
        let program = generate_stan(&gaussian_linear());
        let data = program.find("data {").unwrap();
        let params = program.find("parameters {").unwrap();
        let model = program.find("model {").unwrap();
        assert!(data < params && params < model);
        assert!(program.contains("real<lower=0> sigma;"));
        assert!(program.contains("y ~ normal(intercept + slope * x, sigma);"));
    }

    #[test]
    fn poisson_program_uses_log_link_and_count_array() {
        let program = generate_stan(&poisson_loglinear());
        assert!(program.contains("array[N] int<lower=0> ozone;"));
        assert!(program.contains("ozone ~ poisson_log(a + b * temp);"));
    }
}
