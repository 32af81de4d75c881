//! Golden-file tests for Stan program rendering.
//!
//! The rendered programs are pinned against reference files so changes to
//! the generator never silently alter the text handed to the engine.

use bayesfit::codegen::generate_stan;
use bayesfit::models::{gaussian_linear, poisson_loglinear};
use std::fs;
use std::path::Path;

const UPDATE_GOLDEN: bool = false; // Set to true to regenerate golden files

fn check_golden(test_name: &str, generated: &str) {
    let golden_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/golden");
    if !golden_dir.exists() {
        fs::create_dir_all(&golden_dir).expect("Failed to create golden directory");
    }

    let golden_path = golden_dir.join(format!("{}.stan", test_name));

    if UPDATE_GOLDEN || !golden_path.exists() {
        fs::write(&golden_path, generated)
            .unwrap_or_else(|_| panic!("Failed to write golden file: {:?}", golden_path));
        println!("Updated golden file: {:?}", golden_path);
    } else {
        let golden = fs::read_to_string(&golden_path)
            .unwrap_or_else(|_| panic!("Failed to read golden file: {:?}", golden_path));

        if generated.trim() != golden.trim() {
            let actual_path = golden_dir.join(format!("{}.actual.stan", test_name));
            fs::write(&actual_path, generated).expect("Failed to write actual output");
            panic!(
                "\nGolden file mismatch for test '{}'\n\
                 Expected: {:?}\n\
                 Actual:   {:?}\n\n\
                 To update golden files, set UPDATE_GOLDEN = true and re-run tests.\n\
                 To see diff:\n  diff {:?} {:?}\n",
                test_name, golden_path, actual_path, golden_path, actual_path
            );
        }
    }
}

#[test]
fn golden_gaussian_linear() {
    let program = generate_stan(&gaussian_linear());
    check_golden("gaussian_linear", &program);
}

#[test]
fn golden_poisson_loglinear() {
    let program = generate_stan(&poisson_loglinear());
    check_golden("poisson_loglinear", &program);
}

#[test]
fn programs_have_exactly_three_sections_in_order() {
    for spec in [gaussian_linear(), poisson_loglinear()] {
        let program = generate_stan(&spec);

        let data = program.find("data {").expect("data section");
        let params = program.find("parameters {").expect("parameters section");
        let model = program.find("model {").expect("model section");
        assert!(data < params, "data must precede parameters");
        assert!(params < model, "parameters must precede model");

        // No other block types sneak in.
        assert!(!program.contains("transformed data"));
        assert!(!program.contains("transformed parameters"));
        assert!(!program.contains("generated quantities"));
        assert!(!program.contains("functions"));
    }
}

#[test]
fn rendering_is_deterministic() {
    let a = generate_stan(&gaussian_linear());
    let b = generate_stan(&gaussian_linear());
    assert_eq!(a, b);
}

#[test]
fn support_constraint_is_declared_not_filtered() {
    // sigma's positivity lives in the parameter declaration.
    let program = generate_stan(&gaussian_linear());
    assert!(program.contains("real<lower=0> sigma;"));
}
