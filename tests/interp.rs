mod common;

use common::{all_options, both_backends, instantiate};
use tivm::{CompileOption, Error, MemoryBackendKind, Trap, Val};

#[test_log::test]
fn store_load_round_trip() {
    let wat = r#"
    (module
        (memory 1)
        (func (export "run") (result i32)
            i32.const 4
            i32.const 0xDEADBEEF
            i32.store
            i32.const 4
            i32.load))
    "#;

    for options in all_options() {
        for backend in both_backends() {
            let mut bytes = Vec::new();
            let registry = instantiate(wat, &mut bytes, options.clone(), backend);
            let results = registry.invoke("test", "run", &[]).unwrap();
            assert_eq!(results[0], Val::I32(0xDEADBEEF_u32 as i32));
        }
    }
}

#[test_log::test]
fn store_load_all_types_unaligned() {
    let wat = r#"
    (module
        (memory 1)
        (func (export "i64") (param i32 i64) (result i64)
            local.get 0
            local.get 1
            i64.store
            local.get 0
            i64.load)
        (func (export "f32") (param i32 f32) (result f32)
            local.get 0
            local.get 1
            f32.store
            local.get 0
            f32.load)
        (func (export "f64") (param i32 f64) (result f64)
            local.get 0
            local.get 1
            f64.store
            local.get 0
            f64.load))
    "#;

    for options in all_options() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, options, MemoryBackendKind::Mmap);

        for addr in [0_i32, 1, 3, 7] {
            let value = 0x0123_4567_89AB_CDEF_i64;
            let results = registry
                .invoke("test", "i64", &[Val::I32(addr), Val::I64(value)])
                .unwrap();
            assert_eq!(results[0], Val::I64(value));

            let bits = (1.5_f32 + addr as f32).to_bits();
            let results = registry
                .invoke("test", "f32", &[Val::I32(addr), Val::F32(bits)])
                .unwrap();
            assert_eq!(results[0], Val::F32(bits));

            let bits = 0x400921FB54442D18_u64; // pi
            let results = registry
                .invoke("test", "f64", &[Val::I32(addr), Val::F64(bits)])
                .unwrap();
            assert_eq!(results[0], Val::F64(bits));
        }
    }
}

#[test_log::test]
fn bounds_trap_at_the_edge() {
    let wat = r#"
    (module
        (memory 1)
        (func (export "load") (param i32) (result i32)
            local.get 0
            i32.load)
        (func (export "load_off1") (param i32) (result i32)
            local.get 0
            i32.load offset=1))
    "#;

    for options in all_options() {
        for backend in both_backends() {
            let mut bytes = Vec::new();
            let registry = instantiate(wat, &mut bytes, options.clone(), backend);

            // eff == len - width succeeds...
            let results = registry.invoke("test", "load", &[Val::I32(65532)]).unwrap();
            assert_eq!(results[0], Val::I32(0));

            // ...one past traps with the full context tuple.
            let err = registry
                .invoke("test", "load", &[Val::I32(65533)])
                .unwrap_err();
            match err {
                Error::Trap(Trap::MemoryOutOfBounds {
                    effective_offset,
                    memory_length,
                    access_width,
                    static_offset,
                    ..
                }) => {
                    assert_eq!(effective_offset, 65533);
                    assert_eq!(memory_length, 65536);
                    assert_eq!(access_width, 4);
                    assert_eq!(static_offset, 0);
                }
                other => panic!("expected an out-of-bounds trap, got {other:?}"),
            }

            // A static offset participates in the effective address.
            let err = registry
                .invoke("test", "load_off1", &[Val::I32(65533)])
                .unwrap_err();
            match err {
                Error::Trap(Trap::MemoryOutOfBounds {
                    effective_offset,
                    static_offset,
                    ..
                }) => {
                    assert_eq!(effective_offset, 65534);
                    assert_eq!(static_offset, 1);
                }
                other => panic!("expected an out-of-bounds trap, got {other:?}"),
            }
        }
    }
}

#[test_log::test]
fn effective_address_wraps_mod_2_32() {
    let wat = r#"
    (module
        (memory 1)
        (func (export "load") (param i32) (result i32)
            local.get 0
            i32.load offset=8))
    "#;

    for backend in both_backends() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, CompileOption::default(), backend);

        // addr + offset wraps to a small in-bounds address: the wrapped
        // address must be used, not a 33-bit sum.
        let results = registry
            .invoke("test", "load", &[Val::I32(-8)])
            .unwrap();
        assert_eq!(results[0], Val::I32(0));
    }
}

#[test_log::test]
fn grow_then_trap_clears() {
    let wat = r#"
    (module
        (memory 1 4)
        (func (export "grow") (param i32) (result i32)
            local.get 0
            memory.grow)
        (func (export "load") (param i32) (result i32)
            local.get 0
            i32.load)
        (func (export "size") (result i32)
            memory.size))
    "#;

    for backend in both_backends() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, CompileOption::default(), backend);

        assert!(registry
            .invoke("test", "load", &[Val::I32(70000)])
            .is_err());

        let results = registry.invoke("test", "grow", &[Val::I32(1)]).unwrap();
        assert_eq!(results[0], Val::I32(1));
        let results = registry.invoke("test", "size", &[]).unwrap();
        assert_eq!(results[0], Val::I32(2));

        let results = registry.invoke("test", "load", &[Val::I32(70000)]).unwrap();
        assert_eq!(results[0], Val::I32(0));
    }
}

#[test_log::test]
fn division_traps() {
    let wat = r#"
    (module
        (func (export "div_s") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.div_s)
        (func (export "rem_s") (param i32 i32) (result i32)
            local.get 0
            local.get 1
            i32.rem_s)
        (func (export "div64") (param i64 i64) (result i64)
            local.get 0
            local.get 1
            i64.div_s))
    "#;

    for options in all_options() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, options, MemoryBackendKind::Mmap);

        let results = registry
            .invoke("test", "div_s", &[Val::I32(-7), Val::I32(2)])
            .unwrap();
        assert_eq!(results[0], Val::I32(-3));

        let err = registry
            .invoke("test", "div_s", &[Val::I32(1), Val::I32(0)])
            .unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::DivisionByZero)));

        let err = registry
            .invoke("test", "div_s", &[Val::I32(i32::MIN), Val::I32(-1)])
            .unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::IntegerOverflow)));

        // MIN % -1 is 0, not a trap.
        let results = registry
            .invoke("test", "rem_s", &[Val::I32(i32::MIN), Val::I32(-1)])
            .unwrap();
        assert_eq!(results[0], Val::I32(0));

        let err = registry
            .invoke("test", "div64", &[Val::I64(i64::MIN), Val::I64(-1)])
            .unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::IntegerOverflow)));
    }
}

#[test_log::test]
fn unreachable_traps() {
    let wat = r#"
    (module
        (func (export "run")
            unreachable))
    "#;

    for options in all_options() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, options, MemoryBackendKind::Mmap);
        let err = registry.invoke("test", "run", &[]).unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::Unreachable)));
    }
}

#[test_log::test]
fn local_tee_matches_across_ring_depths() {
    // `local.tee` reads the cursor register when cached and `sp - sizeof(T)`
    // when not; the observable behavior must agree at every ring depth.
    let wat = r#"
    (module
        (func (export "run") (param i32) (result i32) (local i32 i64)
            local.get 0
            local.tee 1
            local.get 0
            i32.add
            local.tee 1
            i32.const 7
            i32.add
            local.get 1
            i32.add
            local.tee 1
            local.get 1
            i32.add)
        (func (export "tee64") (param i64) (result i64) (local i64)
            local.get 0
            local.get 0
            i64.add
            local.tee 1
            local.get 1
            i64.add))
    "#;

    let mut expected32 = None;
    let mut expected64 = None;
    for options in all_options() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, options, MemoryBackendKind::Mmap);

        let results = registry.invoke("test", "run", &[Val::I32(21)]).unwrap();
        let got = results[0];
        assert_eq!(*expected32.get_or_insert(got), got);
        assert_eq!(got, Val::I32(2 * (21 + 21 + 7 + 42)));

        let results = registry.invoke("test", "tee64", &[Val::I64(5)]).unwrap();
        let got = results[0];
        assert_eq!(*expected64.get_or_insert(got), got);
        assert_eq!(got, Val::I64(20));
    }
}

#[test_log::test]
fn control_flow_loop_and_br_table() {
    let wat = r#"
    (module
        ;; iterative factorial
        (func (export "fac") (param i32) (result i32) (local i32)
            i32.const 1
            local.set 1
            block
                loop
                    local.get 0
                    i32.eqz
                    br_if 1
                    local.get 0
                    local.get 1
                    i32.mul
                    local.set 1
                    local.get 0
                    i32.const 1
                    i32.sub
                    local.set 0
                    br 0
                end
            end
            local.get 1)
        (func (export "pick") (param i32) (result i32)
            block
                block
                    block
                        local.get 0
                        br_table 0 1 2
                    end
                    i32.const 10
                    return
                end
                i32.const 20
                return
            end
            i32.const 30)
        (func (export "ifelse") (param i32) (result i32)
            local.get 0
            if (result i32)
                i32.const 1
            else
                i32.const 2
            end))
    "#;

    for options in all_options() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, options, MemoryBackendKind::Mmap);

        let results = registry.invoke("test", "fac", &[Val::I32(6)]).unwrap();
        assert_eq!(results[0], Val::I32(720));

        for (input, expected) in [(0, 10), (1, 20), (2, 30), (9, 30)] {
            let results = registry.invoke("test", "pick", &[Val::I32(input)]).unwrap();
            assert_eq!(results[0], Val::I32(expected), "br_table {input}");
        }

        let results = registry.invoke("test", "ifelse", &[Val::I32(5)]).unwrap();
        assert_eq!(results[0], Val::I32(1));
        let results = registry.invoke("test", "ifelse", &[Val::I32(0)]).unwrap();
        assert_eq!(results[0], Val::I32(2));
    }
}

#[test_log::test]
fn recursive_calls() {
    let wat = r#"
    (module
        (func $fib (export "fib") (param i32) (result i32)
            local.get 0
            i32.const 2
            i32.lt_s
            if (result i32)
                local.get 0
            else
                local.get 0
                i32.const 1
                i32.sub
                call $fib
                local.get 0
                i32.const 2
                i32.sub
                call $fib
                i32.add
            end))
    "#;

    for options in all_options() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, options, MemoryBackendKind::Mmap);
        let results = registry.invoke("test", "fib", &[Val::I32(15)]).unwrap();
        assert_eq!(results[0], Val::I32(610));
    }
}

#[test_log::test]
fn infinite_recursion_overflows() {
    // Large frames keep the interpreter's own recursion shallow while the
    // value-stack budget runs out.
    let wat = r#"
    (module
        (func $loop (export "run") (param i64 i64 i64 i64)
            (local i64 i64 i64 i64 i64 i64 i64 i64)
            (local i64 i64 i64 i64 i64 i64 i64 i64)
            (local i64 i64 i64 i64 i64 i64 i64 i64)
            (local i64 i64 i64 i64 i64 i64 i64 i64)
            (local i64 i64 i64 i64 i64 i64 i64 i64)
            (local i64 i64 i64 i64 i64 i64 i64 i64)
            (local i64 i64 i64 i64 i64 i64 i64 i64)
            (local i64 i64 i64 i64 i64 i64 i64 i64)
            local.get 0
            local.get 1
            local.get 2
            local.get 3
            call $loop))
    "#;

    let mut bytes = Vec::new();
    let registry = instantiate(
        wat,
        &mut bytes,
        CompileOption::default(),
        MemoryBackendKind::Mmap,
    );
    let args = [Val::I64(0); 4];
    let err = registry.invoke("test", "run", &args).unwrap_err();
    assert!(matches!(err, Error::Trap(Trap::StackOverflow)));
}

#[test_log::test]
fn float_semantics() {
    let wat = r#"
    (module
        (func (export "min") (param f64 f64) (result f64)
            local.get 0
            local.get 1
            f64.min)
        (func (export "nearest") (param f64) (result f64)
            local.get 0
            f64.nearest)
        (func (export "trunc") (param f64) (result i32)
            local.get 0
            i32.trunc_f64_s)
        (func (export "mix") (param f32 f32) (result f32)
            local.get 0
            local.get 1
            f32.mul
            local.get 0
            f32.add))
    "#;

    for options in all_options() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, options, MemoryBackendKind::Mmap);

        // min(-0.0, +0.0) is -0.0
        let results = registry
            .invoke(
                "test",
                "min",
                &[Val::F64((-0.0_f64).to_bits()), Val::F64(0.0_f64.to_bits())],
            )
            .unwrap();
        assert_eq!(results[0], Val::F64((-0.0_f64).to_bits()));

        // ties to even
        let results = registry
            .invoke("test", "nearest", &[Val::F64(2.5_f64.to_bits())])
            .unwrap();
        assert_eq!(results[0], Val::F64(2.0_f64.to_bits()));

        let err = registry
            .invoke("test", "trunc", &[Val::F64(f64::NAN.to_bits())])
            .unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::BadConversionToInteger)));
        let err = registry
            .invoke("test", "trunc", &[Val::F64(4e9_f64.to_bits())])
            .unwrap_err();
        assert!(matches!(err, Error::Trap(Trap::IntegerOverflow)));

        let results = registry
            .invoke(
                "test",
                "mix",
                &[Val::F32(3.0_f32.to_bits()), Val::F32(4.0_f32.to_bits())],
            )
            .unwrap();
        assert_eq!(results[0], Val::F32(15.0_f32.to_bits()));
    }
}

#[test_log::test]
fn select_and_drop() {
    let wat = r#"
    (module
        (func (export "sel") (param i32 i64 i64) (result i64)
            local.get 1
            local.get 2
            local.get 0
            select)
        (func (export "dropper") (param i32) (result i32)
            local.get 0
            i32.const 99
            drop))
    "#;

    for options in all_options() {
        let mut bytes = Vec::new();
        let registry = instantiate(wat, &mut bytes, options, MemoryBackendKind::Mmap);

        let results = registry
            .invoke(
                "test",
                "sel",
                &[Val::I32(1), Val::I64(111), Val::I64(222)],
            )
            .unwrap();
        assert_eq!(results[0], Val::I64(111));
        let results = registry
            .invoke(
                "test",
                "sel",
                &[Val::I32(0), Val::I64(111), Val::I64(222)],
            )
            .unwrap();
        assert_eq!(results[0], Val::I64(222));

        let results = registry.invoke("test", "dropper", &[Val::I32(42)]).unwrap();
        assert_eq!(results[0], Val::I32(42));
    }
}

#[test_log::test]
fn argument_type_mismatch_is_synchronous() {
    let wat = r#"
    (module
        (func (export "run") (param i32) (result i32)
            local.get 0))
    "#;

    let mut bytes = Vec::new();
    let registry = instantiate(
        wat,
        &mut bytes,
        CompileOption::default(),
        MemoryBackendKind::Mmap,
    );

    let err = registry.invoke("test", "run", &[Val::I64(1)]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
    let err = registry.invoke("test", "run", &[]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));
}
