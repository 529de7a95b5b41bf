// A suite driven by the testprof harness instead of libtest.
//
//   cargo test --test harness_demo -- --profile
//   cargo test --test harness_demo -- --profile-combined-only --profile
//   cargo test --test harness_demo -- --profile-svg        (needs gprof2dot and dot)

use testprof::harness::{Failed, Harness, Trial};
use testprof::profile_scope;

fn fib(n: u64) -> u64 {
    profile_scope!("fib");
    if n < 2 {
        n
    } else {
        fib(n - 1) + fib(n - 2)
    }
}

fn word_counts(text: &str) -> Vec<(String, usize)> {
    profile_scope!("word_counts");
    let mut counts = std::collections::BTreeMap::new();
    for word in text.split_whitespace() {
        *counts.entry(word.to_lowercase()).or_insert(0) += 1;
    }
    counts.into_iter().collect()
}

fn check_fib() -> Result<(), Failed> {
    let got = fib(15);
    if got != 610 {
        return Err(format!("fib(15) = {got}, expected 610").into());
    }
    Ok(())
}

fn check_word_counts() -> Result<(), Failed> {
    let counts = word_counts("the quick fox jumps over the lazy dog The end");
    let the = counts.iter().find(|(w, _)| w == "the").map(|(_, n)| *n);
    assert_eq!(the, Some(3));
    Ok(())
}

fn main() {
    let trials = vec![
        Trial::test("fib::recursive", check_fib),
        Trial::test("text::word_counts", check_word_counts),
    ];
    Harness::from_args().run(trials).exit();
}
