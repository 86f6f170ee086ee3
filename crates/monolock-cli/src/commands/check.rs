use super::{fail, print_json};
use miette::{IntoDiagnostic, Result};
use monolock_core::{check, CheckReport};
use serde::Serialize;
use std::path::PathBuf;

/// Exit code when some package is declared with more than one range.
pub const EXIT_MISMATCH: i32 = 1;

#[derive(Debug, Serialize)]
struct CheckResult<'a> {
    ok: bool,
    mismatches: &'a CheckReport,
}

pub fn run(roots: Vec<PathBuf>, json: bool) -> Result<()> {
    let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
    let report = match rt.block_on(check(&roots)) {
        Ok(report) => report,
        Err(e) => return fail(&e, json),
    };

    if json {
        print_json(&CheckResult {
            ok: report.is_empty(),
            mismatches: &report,
        })?;
    } else if report.is_empty() {
        println!("All {} projects agree on dependency ranges", roots.len());
    } else {
        for (name, ranges) in &report {
            println!("{name}");
            for (range, projects) in ranges {
                println!("  {range}: {}", projects.join(", "));
            }
        }
    }

    if !report.is_empty() {
        std::process::exit(EXIT_MISMATCH);
    }
    Ok(())
}
