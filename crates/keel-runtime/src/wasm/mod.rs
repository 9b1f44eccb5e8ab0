//! Wasmtime-backed foreign runtime.
//!
//! A code unit is either a WebAssembly text module exporting `run`, or an
//! expression program that is lowered to such a module first. Each
//! evaluation gets a fresh `Store`; the engine, linker and compiled-module
//! cache live for the lifetime of the runtime.

pub mod cache;
pub mod host;
pub mod lower;
pub mod syntax;

use wasmtime::{Config, Engine, Linker, Store, Trap, Val};

use crate::config::RuntimeConfig;
use crate::foreign::{Evaluated, ForeignError, ForeignRuntime};
use crate::outcome::Value;

use cache::ModuleCache;
use host::HostState;

pub struct WasmRuntime {
    engine: Engine,
    linker: Linker<HostState>,
    cache: ModuleCache,
    fuel: Option<u64>,
    evaluations: u64,
}

impl WasmRuntime {
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    pub fn cached_modules(&self) -> usize {
        self.cache.len()
    }
}

impl ForeignRuntime for WasmRuntime {
    const NAME: &'static str = "wasmtime";

    fn init(config: &RuntimeConfig) -> Result<Self, ForeignError> {
        let mut wasm_config = Config::new();
        if config.engine.fuel.is_some() {
            wasm_config.consume_fuel(true);
        }

        let engine = Engine::new(&wasm_config)
            .map_err(|e| ForeignError::Fatal(format!("engine: {e:#}")))?;
        let linker =
            host::linker(&engine).map_err(|e| ForeignError::Fatal(format!("linker: {e:#}")))?;

        tracing::debug!(
            fuel = ?config.engine.fuel,
            module_cache = config.engine.module_cache,
            "Wasm engine initialized"
        );

        Ok(Self {
            engine,
            linker,
            cache: ModuleCache::new(config.engine.module_cache),
            fuel: config.engine.fuel,
            evaluations: 0,
        })
    }

    fn eval_string(&mut self, source: &str) -> Result<Evaluated, ForeignError> {
        self.evaluations += 1;

        let module = if is_wat_module(source) {
            self.cache.get_or_compile(&self.engine, source)
        } else {
            let lowered =
                lower::lower(source).map_err(|e| ForeignError::exception(e.to_string()))?;
            self.cache.get_or_compile(&self.engine, &lowered.wat)
        }
        .map_err(|e| ForeignError::exception(format!("CompileError: {}", e.root_cause())))?;

        let mut store = Store::new(&self.engine, HostState::default());
        if let Some(fuel) = self.fuel {
            store
                .set_fuel(fuel)
                .map_err(|e| ForeignError::Fatal(format!("fuel: {e:#}")))?;
        }

        let instance = match self.linker.instantiate(&mut store, &module) {
            Ok(instance) => instance,
            Err(e) => return Err(raised(store, describe(&e))),
        };

        let Some(run) = instance.get_func(&mut store, "run") else {
            return Err(raised(store, "module does not export a `run` function".into()));
        };

        let ty = run.ty(&store);
        if ty.params().next().is_some() {
            return Err(raised(store, "`run` must not take parameters".into()));
        }
        let mut results: Vec<Val> = ty.results().map(|_| Val::I32(0)).collect();

        if let Err(e) = run.call(&mut store, &[], &mut results) {
            return Err(raised(store, describe(&e)));
        }

        let value = match results.as_slice() {
            [] => None,
            [val] => match to_value(val) {
                Some(value) => Some(value),
                None => return Err(raised(store, format!("unsupported result {val:?}"))),
            },
            _ => return Err(raised(store, "`run` returned more than one value".into())),
        };

        Ok(Evaluated {
            value,
            output: store.into_data().output,
        })
    }

    fn atexit_hook(&mut self, status: i32) {
        tracing::info!(
            status,
            evaluations = self.evaluations,
            cache_hits = self.cache.hits(),
            cache_misses = self.cache.misses(),
            "Wasm runtime exiting"
        );
        self.cache.clear();
    }
}

fn is_wat_module(source: &str) -> bool {
    source.trim_start().starts_with("(module")
}

/// Exception carrying whatever the unit printed before it failed.
fn raised(store: Store<HostState>, message: String) -> ForeignError {
    ForeignError::Exception {
        message,
        output: store.into_data().output,
    }
}

fn describe(error: &wasmtime::Error) -> String {
    if let Some(trap) = error.downcast_ref::<Trap>() {
        return match trap {
            Trap::IntegerDivisionByZero | Trap::IntegerOverflow => {
                "DivideError: integer division error".into()
            }
            Trap::OutOfFuel => "evaluation ran out of fuel".into(),
            Trap::StackOverflow => "StackOverflowError: stack overflow".into(),
            other => format!("wasm trap: {other}"),
        };
    }
    error.root_cause().to_string()
}

fn to_value(val: &Val) -> Option<Value> {
    match val {
        Val::I32(v) => Some(Value::Int(i64::from(*v))),
        Val::I64(v) => Some(Value::Int(*v)),
        Val::F32(bits) => Some(Value::Float(f64::from(f32::from_bits(*bits)))),
        Val::F64(bits) => Some(Value::Float(f64::from_bits(*bits))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(config: RuntimeConfig) -> WasmRuntime {
        WasmRuntime::init(&config).unwrap()
    }

    fn eval(source: &str) -> Result<Evaluated, ForeignError> {
        runtime(RuntimeConfig::default()).eval_string(source)
    }

    fn exception_message(result: Result<Evaluated, ForeignError>) -> String {
        match result {
            Err(ForeignError::Exception { message, .. }) => message,
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn evaluates_integer_arithmetic() {
        let evaluated = eval("1+1").unwrap();
        assert_eq!(evaluated.value, Some(Value::Int(2)));
        assert!(evaluated.output.is_empty());
    }

    #[test]
    fn evaluates_sqrt() {
        let evaluated = eval("sqrt(2.0)").unwrap();
        let Some(Value::Float(v)) = evaluated.value else {
            panic!("expected a float, got {:?}", evaluated.value);
        };
        assert!((v - 1.41421356).abs() < 1e-8);
    }

    #[test]
    fn println_is_captured() {
        let evaluated = eval("println(sqrt(2.0))").unwrap();
        assert_eq!(evaluated.value, None);
        assert_eq!(evaluated.output, vec!["1.4142135623730951".to_string()]);
    }

    #[test]
    fn builtins_follow_integer_and_float_rules() {
        let cases = [
            ("7 ÷ 2", Value::Int(3)),
            ("-7 % 3", Value::Int(-1)),
            ("abs(-5)", Value::Int(5)),
            ("abs(-2.5)", Value::Float(2.5)),
            ("min(3, -4)", Value::Int(-4)),
            ("max(3, 4.5)", Value::Float(4.5)),
            ("round(2.5)", Value::Float(2.0)),
            ("floor(-1.5)", Value::Float(-2.0)),
            ("float(3)", Value::Float(3.0)),
            ("1 / 4", Value::Float(0.25)),
            ("2 * (3 + 4) - 1", Value::Int(13)),
        ];
        let mut rt = runtime(RuntimeConfig::default());
        for (source, expected) in cases {
            let evaluated = rt.eval_string(source).unwrap();
            assert_eq!(evaluated.value, Some(expected), "{source}");
        }
    }

    #[test]
    fn integer_division_by_zero_is_an_exception() {
        assert_eq!(
            exception_message(eval("div(1, 0)")),
            "DivideError: integer division error"
        );
    }

    #[test]
    fn negative_sqrt_is_a_domain_error() {
        let message = exception_message(eval("sqrt(-1.0)"));
        assert!(message.starts_with("DomainError with -1.0"), "got: {message}");
    }

    #[test]
    fn output_before_a_fault_is_kept() {
        match eval("println(1); div(1, 0)") {
            Err(ForeignError::Exception { output, .. }) => assert_eq!(output, vec!["1"]),
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn parse_errors_are_exceptions() {
        assert!(exception_message(eval("1 +")).starts_with("ParseError:"));
    }

    #[test]
    fn runtime_survives_a_fault() {
        let mut rt = runtime(RuntimeConfig::default());
        assert!(rt.eval_string("div(1, 0)").is_err());
        assert_eq!(rt.eval_string("2 + 2").unwrap().value, Some(Value::Int(4)));
        assert_eq!(rt.evaluations(), 2);
    }

    #[test]
    fn accepts_wat_modules() {
        let evaluated = eval(r#"(module (func (export "run") (result i32) i32.const 7))"#).unwrap();
        assert_eq!(evaluated.value, Some(Value::Int(7)));
    }

    #[test]
    fn wat_without_run_export_is_an_exception() {
        let message = exception_message(eval(r#"(module (func (export "main")))"#));
        assert!(message.contains("`run`"), "got: {message}");
    }

    #[test]
    fn invalid_wat_is_a_compile_error() {
        assert!(exception_message(eval("(module (func")).starts_with("CompileError:"));
    }

    #[test]
    fn unreachable_is_reported_as_a_trap() {
        let message =
            exception_message(eval(r#"(module (func (export "run") unreachable))"#));
        assert!(message.starts_with("wasm trap:"), "got: {message}");
    }

    #[test]
    fn fuel_budget_stops_long_evaluations() {
        let mut config = RuntimeConfig::default();
        config.engine.fuel = Some(10_000);
        let mut rt = runtime(config);
        let message =
            exception_message(rt.eval_string(r#"(module (func (export "run") (loop (br 0))))"#));
        assert_eq!(message, "evaluation ran out of fuel");

        // The budget is per evaluation.
        assert_eq!(rt.eval_string("1 + 1").unwrap().value, Some(Value::Int(2)));
    }

    #[test]
    fn repeated_units_hit_the_module_cache() {
        let mut rt = runtime(RuntimeConfig::default());
        rt.eval_string("1+1").unwrap();
        rt.eval_string("1+1").unwrap();
        assert_eq!(rt.cached_modules(), 1);

        rt.atexit_hook(0);
        assert_eq!(rt.cached_modules(), 0);
    }
}
