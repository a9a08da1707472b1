mod common;

use common::{both_backends, instantiate, link_modules};
use tivm::{CompileOption, Error, ExportRef, MemoryBackendKind, Val};

fn compile(wat: &str) -> Vec<u8> {
    wat::parse_str(wat).expect("valid wat")
}

#[test_log::test]
fn active_data_segment_applied() {
    let wat = r#"
    (module
        (memory 1)
        (data (i32.const 16) "\01\02\03")
        (func (export "byte") (param i32) (result i32)
            local.get 0
            i32.load8_u))
    "#;

    for backend in both_backends() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, CompileOption::default(), backend);

        for (addr, expected) in [(16, 1), (17, 2), (18, 3), (19, 0), (15, 0)] {
            let results = registry.invoke("test", "byte", &[Val::I32(addr)]).unwrap();
            assert_eq!(results[0], Val::I32(expected), "byte at {addr}");
        }
    }
}

#[test_log::test]
fn segment_application_is_idempotent_across_instances() {
    // Two fresh instantiations of the same module must agree byte-for-byte
    // in memory and slot-for-slot in tables.
    let wat = r#"
    (module
        (memory (export "mem") 1)
        (data (i32.const 0) "\de\ad\be\ef")
        (data (i32.const 100) "hello")
        (table 4 funcref)
        (elem (i32.const 1) $f $f)
        (func $f (result i32) i32.const 1)
        (func (export "probe") (param i32) (result i32)
            local.get 0
            call_indirect (result i32)))
    "#;

    let snapshot = |registry: &tivm::Registry<'_>| {
        let ExportRef::Memory(memory) = registry.get_export("test", "mem").unwrap() else {
            panic!("mem export");
        };
        let mut contents = vec![0_u8; 128];
        memory.read_slice(0, &mut contents).unwrap();
        let slots: Vec<bool> = (0..4)
            .map(|i| registry.invoke("test", "probe", &[Val::I32(i)]).is_ok())
            .collect();
        (contents, slots)
    };

    let mut bytes_a = Vec::new();
    let a = instantiate(
        wat,
        &mut bytes_a,
        CompileOption::default(),
        MemoryBackendKind::Mmap,
    );
    let mut bytes_b = Vec::new();
    let b = instantiate(
        wat,
        &mut bytes_b,
        CompileOption::default(),
        MemoryBackendKind::Mmap,
    );

    let (mem_a, slots_a) = snapshot(&a);
    let (mem_b, slots_b) = snapshot(&b);
    assert_eq!(mem_a, mem_b);
    assert_eq!(slots_a, slots_b);
    assert_eq!(slots_a, [false, true, true, false]);
    assert_eq!(&mem_a[0..4], &[0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(&mem_a[100..105], b"hello");
}

#[test_log::test]
fn data_segment_out_of_bounds_is_fatal() {
    // 65534 + 4 bytes exceeds the single page.
    let wat = compile(
        r#"
        (module
            (memory 1 1)
            (data (i32.const 65534) "\01\02\03\04"))
        "#,
    );

    let err = link_modules(
        &[("a", &wat)],
        CompileOption::default(),
        MemoryBackendKind::Mmap,
    )
    .unwrap_err();
    match err {
        Error::InitSegmentOutOfBounds {
            offset,
            len,
            capacity,
        } => {
            assert_eq!(offset, 65534);
            assert_eq!(len, 4);
            assert_eq!(capacity, 65536);
        }
        other => panic!("expected a segment bounds error, got {other:?}"),
    }
}

#[test_log::test]
fn element_segment_out_of_bounds_is_fatal() {
    let wat = compile(
        r#"
        (module
            (table 2 funcref)
            (elem (i32.const 1) $f $f)
            (func $f))
        "#,
    );

    let err = link_modules(
        &[("a", &wat)],
        CompileOption::default(),
        MemoryBackendKind::Mmap,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InitSegmentOutOfBounds { .. }));
}

#[test_log::test]
fn segment_offsets_read_imported_globals() {
    let provider = compile(
        r#"
        (module
            (global (export "off") i32 (i32.const 32)))
        "#,
    );
    let user = compile(
        r#"
        (module
            (import "p" "off" (global $off i32))
            (memory 1)
            (data (global.get $off) "\aa")
            (func (export "byte") (param i32) (result i32)
                local.get 0
                i32.load8_u))
        "#,
    );

    let registry = link_modules(
        &[("p", &provider), ("u", &user)],
        CompileOption::default(),
        MemoryBackendKind::Mmap,
    )
    .unwrap();
    let results = registry.invoke("u", "byte", &[Val::I32(32)]).unwrap();
    assert_eq!(results[0], Val::I32(0xAA));
}
