use crate::population::Population;
use sha2::{Digest, Sha256};
use statrs::statistics::Statistics;
use std::collections::HashSet;
use std::error::Error;
use std::fs;

/// info! that drops ANSI colour codes when colours are disabled
#[macro_export]
macro_rules! cinfo {
    ($colorful:expr, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        if $colorful {
            log::info!("{}", message);
        } else {
            log::info!("{}", $crate::utils::strip_ansi(&message));
        }
    }};
}

pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' && chars.peek() == Some(&'[') {
            chars.next();
            // CSI sequence ends on its first letter
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Mean and sample standard deviation; the deviation of fewer than two values is 0.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    match values.len() {
        0 => (0.0, 0.0),
        1 => (values[0], 0.0),
        _ => (values.iter().mean(), values.iter().std_dev()),
    }
}

/// SHA-256 of the listed input files, in order; empty paths are skipped.
pub fn fingerprint(paths: &[&str]) -> Result<String, Box<dyn Error>> {
    let mut hasher = Sha256::new();
    for path in paths.iter().filter(|p| !p.is_empty()) {
        hasher.update(path.as_bytes());
        hasher.update(fs::read(path)?);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

pub fn display_generation(pop: &Population, generation: usize, max_generations: usize) -> String {
    let best = match pop.individuals.first() {
        Some(best) => best,
        None => return format!("#{:<4} empty population", generation),
    };
    let fits: Vec<f64> = pop.individuals.iter().map(|i| i.fit).collect();
    let (mean, _) = mean_and_std(&fits);
    let distinct = pop.individuals.iter().map(|i| i.hash).collect::<HashSet<u64>>().len();

    format!(
        "#{:<4}/{:<4} | \x1b[1;92mbest {:.3}\x1b[0m (coverage \x1b[1;96m{:.2}%\x1b[0m) | mean {:.3} | {} distinct of {}",
        generation,
        max_generations,
        best.fit,
        best.coverage * 100.0,
        mean,
        distinct,
        pop.individuals.len()
    )
}
