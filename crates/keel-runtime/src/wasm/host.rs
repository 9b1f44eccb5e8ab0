use wasmtime::{Caller, Engine, Linker};

use crate::outcome::format_float;

/// Per-evaluation store data.
///
/// A fresh `HostState` backs every evaluation, so nothing a code unit prints
/// leaks into the next one.
#[derive(Debug, Default)]
pub struct HostState {
    pub output: Vec<String>,
}

impl HostState {
    fn print(&mut self, line: String) {
        tracing::trace!(line, "Runtime output");
        self.output.push(line);
    }
}

/// Linker exposing the `env` imports available to code units:
///
/// - `println_i64(i64)` / `println_f64(f64)` append a line to the output
/// - `domain_error(f64)` raises a `DomainError` for a negative `sqrt` argument
pub fn linker(engine: &Engine) -> anyhow::Result<Linker<HostState>> {
    let mut linker: Linker<HostState> = Linker::new(engine);

    linker.func_wrap(
        "env",
        "println_i64",
        |mut caller: Caller<'_, HostState>, v: i64| caller.data_mut().print(v.to_string()),
    )?;
    linker.func_wrap(
        "env",
        "println_f64",
        |mut caller: Caller<'_, HostState>, v: f64| caller.data_mut().print(format_float(v)),
    )?;
    linker.func_wrap("env", "domain_error", |x: f64| -> anyhow::Result<()> {
        Err(anyhow::anyhow!(
            "DomainError with {}: sqrt was called with a negative real argument",
            format_float(x)
        ))
    })?;

    Ok(linker)
}
