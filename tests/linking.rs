mod common;

use common::link_modules;
use tivm::{CompileOption, Error, ExternKind, MemoryBackendKind, Val};

fn compile(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("valid wat")
}

fn link<'wasm>(
    modules: &[(&str, &'wasm [u8])],
) -> Result<tivm::Registry<'wasm>, Error> {
    link_modules(modules, CompileOption::default(), MemoryBackendKind::Mmap)
}

#[test_log::test]
fn element_segment_wires_imported_function() {
    // Module A exports f; module B imports it, puts it in a table at slot 2,
    // and calls it indirectly.
    let a = compile(
        r#"
        (module
            (func (export "f") (param i32) (result i32)
                local.get 0
                i32.const 1
                i32.add))
        "#,
    );
    let b = compile(
        r#"
        (module
            (type $ii (func (param i32) (result i32)))
            (import "a" "f" (func $imp (type $ii)))
            (table 4 funcref)
            (elem (i32.const 2) $imp)
            (func (export "call_it") (param i32 i32) (result i32)
                local.get 1
                local.get 0
                call_indirect (type $ii)))
        "#,
    );

    let registry = link(&[("a", &a), ("b", &b)]).unwrap();
    let results = registry
        .invoke("b", "call_it", &[Val::I32(2), Val::I32(41)])
        .unwrap();
    assert_eq!(results[0], Val::I32(42));

    // Empty slots trap as uninitialized; out-of-range indices trap as
    // out-of-bounds.
    let err = registry
        .invoke("b", "call_it", &[Val::I32(0), Val::I32(1)])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(tivm::Trap::IndirectCallToNull)
    ));
    let err = registry
        .invoke("b", "call_it", &[Val::I32(9), Val::I32(1)])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(tivm::Trap::TableOutOfBounds { index: 9, size: 4 })
    ));
}

#[test_log::test]
fn indirect_call_signature_mismatch() {
    let a = compile(
        r#"
        (module
            (type $ii (func (param i32) (result i32)))
            (type $v (func))
            (func $f (type $ii) local.get 0)
            (table 1 funcref)
            (elem (i32.const 0) $f)
            (func (export "bad")
                i32.const 0
                call_indirect (type $v)))
        "#,
    );

    let registry = link(&[("a", &a)]).unwrap();
    let err = registry.invoke("a", "bad", &[]).unwrap_err();
    assert!(matches!(
        err,
        Error::Trap(tivm::Trap::IndirectCallTypeMismatch)
    ));
}

#[test_log::test]
fn unresolved_import_is_fatal() {
    let a = compile(
        r#"
        (module
            (import "missing" "f" (func)))
        "#,
    );

    let err = link(&[("a", &a)]).unwrap_err();
    match err {
        Error::LinkUnresolved {
            module,
            name,
            importer,
        } => {
            assert_eq!(module, "missing");
            assert_eq!(name, "f");
            assert_eq!(importer, "a");
        }
        other => panic!("expected an unresolved-import error, got {other:?}"),
    }
}

#[test_log::test]
fn func_import_type_mismatch_is_fatal() {
    let a = compile(
        r#"
        (module
            (func (export "f") (param i32) (result i32)
                local.get 0))
        "#,
    );
    let b = compile(
        r#"
        (module
            (import "a" "f" (func (param i64) (result i64))))
        "#,
    );

    let err = link(&[("a", &a), ("b", &b)]).unwrap_err();
    assert!(matches!(err, Error::LinkTypeMismatch { .. }));
}

#[test_log::test]
fn memory_limit_subtyping() {
    let provider = compile(
        r#"
        (module
            (memory (export "mem") 2 4))
        "#,
    );
    // min too small: 1 < 2 is fine (1 <= 2 means actual min 2 >= expected 1).
    let ok = compile(
        r#"
        (module
            (import "p" "mem" (memory 1 4))
            (func (export "size") (result i32) memory.size))
        "#,
    );
    let registry = link(&[("p", &provider), ("ok", &ok)]).unwrap();
    let results = registry.invoke("ok", "size", &[]).unwrap();
    assert_eq!(results[0], Val::I32(2));

    // Expecting a tighter maximum than the provider declares fails.
    let provider = compile(
        r#"
        (module
            (memory (export "mem") 2 8))
        "#,
    );
    let too_tight = compile(
        r#"
        (module
            (import "p" "mem" (memory 1 4)))
        "#,
    );
    let err = link(&[("p", &provider), ("bad", &too_tight)]).unwrap_err();
    assert!(matches!(err, Error::LinkTypeMismatch { .. }));
}

#[test_log::test]
fn global_import_chain_and_initializer() {
    let a = compile(
        r#"
        (module
            (global (export "base") i32 (i32.const 100)))
        "#,
    );
    // B re-exports its import; C initializes a global through the chain.
    let b = compile(
        r#"
        (module
            (import "a" "base" (global (export "base") i32)))
        "#,
    );
    let c = compile(
        r#"
        (module
            (import "b" "base" (global $base i32))
            (global $derived i32 (global.get $base))
            (func (export "read") (result i32)
                global.get $derived))
        "#,
    );

    let registry = link(&[("a", &a), ("b", &b), ("c", &c)]).unwrap();
    let results = registry.invoke("c", "read", &[]).unwrap();
    assert_eq!(results[0], Val::I32(100));
}

#[test_log::test]
fn global_initializer_cycle_is_fatal() {
    // Each global's initializer reads the other through the module's own
    // exports: the classic two-node cycle.
    let a = compile(
        r#"
        (module
            (import "a" "g1" (global $i0 i32))
            (import "a" "g0" (global $i1 i32))
            (global (export "g0") i32 (global.get $i0))
            (global (export "g1") i32 (global.get $i1)))
        "#,
    );

    let err = link(&[("a", &a)]).unwrap_err();
    assert!(matches!(err, Error::InitGlobalCycle { .. }));
}

#[test_log::test]
fn mutable_global_initializer_is_rejected() {
    let a = compile(
        r#"
        (module
            (global (export "m") (mut i32) (i32.const 3)))
        "#,
    );
    let b = compile(
        r#"
        (module
            (import "a" "m" (global $m (mut i32)))
            (global i32 (global.get $m)))
        "#,
    );

    // The validating decoder already refuses mutable globals in constant
    // expressions; the initializer's own check backs it up for pre-validated
    // inputs.
    let err = link(&[("a", &a), ("b", &b)]).unwrap_err();
    assert!(matches!(
        err,
        Error::InitInvalidConstExpr { .. } | Error::InvalidWebAssembly { .. }
    ));
}

#[test_log::test]
fn host_functions_resolve_and_type_check() {
    use tivm::{FuncType, HostFunc, WasmValType};

    let a = compile(
        r#"
        (module
            (import "env" "add3" (func $add3 (param i32) (result i32)))
            (func (export "run") (param i32) (result i32)
                local.get 0
                call $add3))
        "#,
    );

    let mut registry = tivm::Registry::new(MemoryBackendKind::Mmap);
    registry
        .define_host_func(
            "env",
            "add3",
            HostFunc::new(
                FuncType::new([WasmValType::I32], [WasmValType::I32]),
                |args, results| {
                    results[0] = Val::I32(args[0].unwrap_i32() + 3);
                    Ok(())
                },
            ),
        )
        .unwrap();

    let mut validator = wasmparser::Validator::new();
    let parsed = tivm::ParsedModule::parse(&mut validator, &a).unwrap();
    registry.register("a", parsed).unwrap();
    tivm::Linker::default().initialize(&mut registry).unwrap();

    let results = registry.invoke("a", "run", &[Val::I32(39)]).unwrap();
    assert_eq!(results[0], Val::I32(42));

    // A host symbol with the wrong signature must fail the link.
    let mut registry = tivm::Registry::new(MemoryBackendKind::Mmap);
    registry
        .define_host_func(
            "env",
            "add3",
            HostFunc::new(FuncType::new([WasmValType::I64], []), |_, _| Ok(())),
        )
        .unwrap();
    let mut validator = wasmparser::Validator::new();
    let parsed = tivm::ParsedModule::parse(&mut validator, &a).unwrap();
    registry.register("a", parsed).unwrap();
    let err = tivm::Linker::default()
        .initialize(&mut registry)
        .unwrap_err();
    assert!(matches!(err, Error::LinkTypeMismatch { .. }));
}

#[test_log::test]
fn start_function_runs_after_segments() {
    let a = compile(
        r#"
        (module
            (memory 1)
            (data (i32.const 0) "\2a\00\00\00")
            (global $out (mut i32) (i32.const 0))
            (func $start
                i32.const 0
                i32.load
                global.set $out)
            (start $start)
            (func (export "read") (result i32)
                global.get $out))
        "#,
    );

    let registry = link(&[("a", &a)]).unwrap();
    let results = registry.invoke("a", "read", &[]).unwrap();
    assert_eq!(results[0], Val::I32(42));
}

#[test_log::test]
fn exports_iterate_with_kinds() {
    let a = compile(
        r#"
        (module
            (memory (export "mem") 1)
            (table (export "tab") 2 funcref)
            (global (export "g") i32 (i32.const 7))
            (func (export "f") (result i32) i32.const 0))
        "#,
    );

    let registry = link(&[("a", &a)]).unwrap();
    let mut kinds: Vec<(&str, ExternKind)> = registry
        .exports("a")
        .unwrap()
        .map(|(name, kind, _)| (name, kind))
        .collect();
    kinds.sort_by_key(|(name, _)| *name);
    assert_eq!(
        kinds,
        [
            ("f", ExternKind::Func),
            ("g", ExternKind::Global),
            ("mem", ExternKind::Memory),
            ("tab", ExternKind::Table),
        ]
    );

    match registry.get_export("a", "mem").unwrap() {
        tivm::ExportRef::Memory(memory) => assert_eq!(memory.page_count(), 1),
        other => panic!("expected a memory export, got {other:?}"),
    }
}

#[test_log::test]
fn duplicate_module_names_are_rejected() {
    let a = compile("(module)");
    let mut registry = tivm::Registry::new(MemoryBackendKind::Mmap);
    let mut validator = wasmparser::Validator::new();
    let parsed = tivm::ParsedModule::parse(&mut validator, &a).unwrap();
    registry.register("a", parsed).unwrap();
    let parsed = tivm::ParsedModule::parse(&mut validator, &a).unwrap();
    let err = registry.register("a", parsed).unwrap_err();
    assert!(matches!(err, Error::DuplicateModule(_)));
}
