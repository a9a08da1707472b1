mod common;

use common::{both_backends, instantiate};
use tivm::{CompileOption, MemoryBackendKind, Val};

const WAT: &str = r#"
(module
    (memory 1 4)
    (func (export "grow") (param i32) (result i32)
        local.get 0
        memory.grow)
    (func (export "size") (result i32)
        memory.size)
    (func (export "store") (param i32 i32)
        local.get 0
        local.get 1
        i32.store)
    (func (export "load") (param i32) (result i32)
        local.get 0
        i32.load))
"#;

#[test_log::test]
fn strict_grow_returns_minus_one_over_the_limit() {
    for backend in both_backends() {
        let mut bytes = Vec::new();
        let registry = instantiate(WAT, &mut bytes, CompileOption::default(), backend);

        let results = registry.invoke("test", "grow", &[Val::I32(1)]).unwrap();
        assert_eq!(results[0], Val::I32(1));

        // current (2) + 3 > 4: strict growth fails and nothing changes.
        let results = registry.invoke("test", "grow", &[Val::I32(3)]).unwrap();
        assert_eq!(results[0], Val::I32(-1));
        let results = registry.invoke("test", "size", &[]).unwrap();
        assert_eq!(results[0], Val::I32(2));

        // Growing by zero reports the current size.
        let results = registry.invoke("test", "grow", &[Val::I32(0)]).unwrap();
        assert_eq!(results[0], Val::I32(2));
    }
}

#[test_log::test]
fn silent_grow_clamps_to_the_limit() {
    let options = CompileOption {
        grow_strict: false,
        ..CompileOption::default()
    };

    for backend in both_backends() {
        let mut bytes = Vec::new();
        let registry = instantiate(WAT, &mut bytes, options.clone(), backend);

        // 1 + 9 would exceed the limit of 4: clamps to 4 and still reports
        // the previous size.
        let results = registry.invoke("test", "grow", &[Val::I32(9)]).unwrap();
        assert_eq!(results[0], Val::I32(1));
        let results = registry.invoke("test", "size", &[]).unwrap();
        assert_eq!(results[0], Val::I32(4));
    }
}

#[test_log::test]
fn growth_preserves_contents_and_extends_zeroed() {
    for backend in both_backends() {
        let mut bytes = Vec::new();
        let registry = instantiate(WAT, &mut bytes, CompileOption::default(), backend);

        registry
            .invoke("test", "store", &[Val::I32(1000), Val::I32(0x5A5A5A5A)])
            .unwrap();
        registry.invoke("test", "grow", &[Val::I32(2)]).unwrap();

        let results = registry.invoke("test", "load", &[Val::I32(1000)]).unwrap();
        assert_eq!(results[0], Val::I32(0x5A5A5A5A));
        let results = registry.invoke("test", "load", &[Val::I32(70000)]).unwrap();
        assert_eq!(results[0], Val::I32(0));
    }
}

/// Executions on separate threads hammer the same allocator-backed memory
/// while another thread grows it; the grow protocol must keep every access
/// on a valid base.
#[test_log::test]
fn concurrent_access_during_grow() {
    let wat = r#"
    (module
        (memory 1 256)
        (func (export "grow") (param i32) (result i32)
            local.get 0
            memory.grow)
        (func (export "churn") (param i32) (result i32) (local i32)
            block
                loop
                    local.get 1
                    i32.const 1000
                    i32.ge_s
                    br_if 1
                    i32.const 64
                    local.get 0
                    i32.store
                    i32.const 64
                    i32.load
                    drop
                    local.get 1
                    i32.const 1
                    i32.add
                    local.set 1
                    br 0
                end
            end
            i32.const 64
            i32.load))
    "#;

    let mut bytes = Vec::new();
    let registry = instantiate(
        wat,
        &mut bytes,
        CompileOption::default(),
        MemoryBackendKind::Alloc,
    );

    std::thread::scope(|scope| {
        for t in 0..4 {
            let registry = &registry;
            scope.spawn(move || {
                for round in 0..50 {
                    let value = t * 10_000 + round;
                    let results = registry
                        .invoke("test", "churn", &[Val::I32(value)])
                        .unwrap();
                    assert!(results[0].is_i32());
                }
            });
        }
        let registry = &registry;
        scope.spawn(move || {
            for _ in 0..100 {
                let results = registry.invoke("test", "grow", &[Val::I32(1)]).unwrap();
                assert_ne!(results[0], Val::I32(-1));
            }
        });
    });

    let results = registry.invoke("test", "grow", &[Val::I32(0)]).unwrap();
    assert_eq!(results[0], Val::I32(101));
}
