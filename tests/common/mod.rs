#![allow(dead_code)]

use tivm::{CompileOption, Linker, MemoryBackendKind, ParsedModule, Registry};
use wasmparser::Validator;

/// Parse, register, and link a single WAT module as `"test"`.
///
/// The caller owns the binary buffer so the registry can borrow from it.
pub fn instantiate<'wasm>(
    wat: &str,
    bytes: &'wasm mut Vec<u8>,
    options: CompileOption,
    backend: MemoryBackendKind,
) -> Registry<'wasm> {
    *bytes = wat::parse_str(wat).expect("valid wat");
    let mut validator = Validator::new();
    let parsed = ParsedModule::parse(&mut validator, bytes).expect("valid module");

    let mut registry = Registry::new(backend);
    registry.register("test", parsed).expect("register");
    Linker::new(options)
        .initialize(&mut registry)
        .expect("link");
    registry
}

/// Parse and link several WAT modules in registration order.
pub fn link_modules<'wasm>(
    modules: &[(&str, &'wasm [u8])],
    options: CompileOption,
    backend: MemoryBackendKind,
) -> Result<Registry<'wasm>, tivm::Error> {
    let mut registry = Registry::new(backend);
    let mut validator = Validator::new();
    for (name, bytes) in modules {
        let parsed = ParsedModule::parse(&mut validator, bytes)?;
        registry.register(name, parsed)?;
    }
    Linker::new(options).initialize(&mut registry)?;
    Ok(registry)
}

/// The three interpreter configurations every behavioral test should agree
/// across: cached tail-call dispatch, uncached tail-call dispatch, and the
/// by-reference loop.
pub fn all_options() -> [CompileOption; 3] {
    [
        CompileOption::default(),
        CompileOption::uncached(true),
        CompileOption::uncached(false),
    ]
}

pub fn both_backends() -> [MemoryBackendKind; 2] {
    [MemoryBackendKind::Mmap, MemoryBackendKind::Alloc]
}
