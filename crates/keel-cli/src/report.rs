use std::io::{self, Write};

use keel_runtime::EvalOutcome;
use serde_json::json;

/// Write each outcome to stdout, diagnostics to stderr.
///
/// Plain mode prints the unit's captured output followed by its value, the
/// way a REPL echoes a result. JSON mode prints one object per line with the
/// unit label attached.
pub fn print(labels: &[String], outcomes: &[EvalOutcome], as_json: bool) -> io::Result<()> {
    let mut stdout = io::stdout().lock();

    for (label, outcome) in labels.iter().zip(outcomes) {
        if as_json {
            let line = json!({ "unit": label, "outcome": outcome });
            writeln!(stdout, "{line}")?;
            continue;
        }

        for line in outcome.output() {
            writeln!(stdout, "{line}")?;
        }
        match outcome {
            EvalOutcome::Success { value: Some(v), .. } => writeln!(stdout, "{v}")?,
            EvalOutcome::Success { value: None, .. } => {}
            EvalOutcome::Failure { diagnostic, .. } => {
                stdout.flush()?;
                eprintln!("ERROR ({label}): {diagnostic}");
            }
        }
    }

    stdout.flush()
}
