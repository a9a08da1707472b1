mod common;

use common::instantiate;
use proptest::prelude::*;
use tivm::{CompileOption, Limits, MemoryBackendKind, Val};

const PAGE: u64 = 65536;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The effective address is `(addr + static_offset) mod 2^32`, and a
    /// 4-byte access succeeds iff it fits the single page.
    #[test]
    fn effective_offset_matches_reference(addr: u32) {
        let wat = r#"
        (module
            (memory 1 1)
            (func (export "load0") (param i32) (result i32)
                local.get 0
                i32.load)
            (func (export "load1") (param i32) (result i32)
                local.get 0
                i32.load offset=1)
            (func (export "load8") (param i32) (result i32)
                local.get 0
                i32.load offset=8)
            (func (export "load_max") (param i32) (result i32)
                local.get 0
                i32.load offset=4294967295))
        "#;

        let mut bytes = Vec::new();
        let registry = instantiate(
            wat,
            &mut bytes,
            CompileOption::default(),
            MemoryBackendKind::Alloc,
        );

        for (name, static_offset) in [
            ("load0", 0_u32),
            ("load1", 1),
            ("load8", 8),
            ("load_max", u32::MAX),
        ] {
            // Reference computation in full 64-bit arithmetic, truncated.
            let eff = u64::from(addr.wrapping_add(static_offset));
            let fits = eff <= PAGE - 4;

            let outcome = registry.invoke("test", name, &[Val::I32(addr as i32)]);
            prop_assert_eq!(
                outcome.is_ok(),
                fits,
                "addr={} offset={} eff={}",
                addr,
                static_offset,
                eff
            );
        }
    }

    /// Store-then-load of any bit pattern at any valid (aligned or not)
    /// offset is bit-exact for all four value types.
    #[test]
    fn store_load_bit_exact(bits: u64, addr in 0_u32..(65536 - 8)) {
        let wat = r#"
        (module
            (memory 1 1)
            (func (export "rt64") (param i32 i64) (result i64)
                local.get 0
                local.get 1
                i64.store
                local.get 0
                i64.load)
            (func (export "rt32") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.store
                local.get 0
                i32.load)
            (func (export "rtf32") (param i32 f32) (result f32)
                local.get 0
                local.get 1
                f32.store
                local.get 0
                f32.load)
            (func (export "rtf64") (param i32 f64) (result f64)
                local.get 0
                local.get 1
                f64.store
                local.get 0
                f64.load))
        "#;

        let mut bytes = Vec::new();
        let registry = instantiate(
            wat,
            &mut bytes,
            CompileOption::default(),
            MemoryBackendKind::Alloc,
        );
        let addr = Val::I32(addr as i32);

        let out = registry.invoke("test", "rt64", &[addr, Val::I64(bits as i64)]).unwrap();
        prop_assert_eq!(out[0], Val::I64(bits as i64));

        let out = registry.invoke("test", "rt32", &[addr, Val::I32(bits as i32)]).unwrap();
        prop_assert_eq!(out[0], Val::I32(bits as i32));

        // NaN payloads included: plain loads and stores never canonicalize.
        let out = registry.invoke("test", "rtf32", &[addr, Val::F32(bits as u32)]).unwrap();
        prop_assert_eq!(out[0], Val::F32(bits as u32));

        let out = registry.invoke("test", "rtf64", &[addr, Val::F64(bits)]).unwrap();
        prop_assert_eq!(out[0], Val::F64(bits));
    }

    /// Limit compatibility is reflexive and transitive, and widening the
    /// expected window never breaks compatibility.
    #[test]
    fn limits_compatibility_laws(
        a_min in 0_u64..100,
        a_span in proptest::option::of(0_u64..100),
        b_min in 0_u64..100,
        b_span in proptest::option::of(0_u64..100),
        c_min in 0_u64..100,
        c_span in proptest::option::of(0_u64..100),
    ) {
        let limits = |min: u64, span: Option<u64>| Limits {
            min,
            max: span.map(|s| min + s),
        };
        let a = limits(a_min, a_span);
        let b = limits(b_min, b_span);
        let c = limits(c_min, c_span);

        prop_assert!(a.is_compatible_with(&a));
        if a.is_compatible_with(&b) && b.is_compatible_with(&c) {
            prop_assert!(a.is_compatible_with(&c));
        }
        // Dropping the expected maximum only widens what is accepted.
        let widened = Limits { min: b.min, max: None };
        if a.is_compatible_with(&b) {
            prop_assert!(a.is_compatible_with(&widened));
        }
    }
}
