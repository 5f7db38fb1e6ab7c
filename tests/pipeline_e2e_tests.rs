//! End-to-end pipeline tests: dump text in, class image out, generated
//! methods executed with the reference interpreter.

use gimbal::codegen::interp::{Machine, Trap, VmValue};
use gimbal::{CompileOptions, PackageCompiler, ReferenceMethodTable, TextFrontEnd};
use std::path::PathBuf;

fn compile_one(name: &str, source: &str) -> gimbal::CompiledUnit {
    let path = format!("{name}.c");
    let front_end = TextFrontEnd::new().with(path.clone(), source);
    let table = ReferenceMethodTable::standard();
    let compiler = PackageCompiler::new(&front_end, &table, CompileOptions::new(name, "out"));
    let (unit, _) = compiler.compile_unit(&[PathBuf::from(path)]).unwrap();
    unit
}

#[test]
fn test_weighted_mean_package() {
    let unit = compile_one(
        "wmean",
        r#"
        ;; weighted mean over parallel arrays
        double wmean (double * x, double * w, int n)
        {
          double num;
          double den;
          double t;
          int i;

          <bb 2>:
            num = 0.0;
            den = 0.0;
            i = 0;
            goto <bb 4>;

          <bb 3>:
            t = x[i] * w[i];
            num = num + t;
            den = den + w[i];
            i = i + 1;
            goto <bb 4>;

          <bb 4>:
            if (i < n) goto <bb 3>; else goto <bb 5>;

          <bb 5>:
            num = num / den;
            return num;
        }
        "#,
    );
    assert_eq!(unit.name, "wmean.Wmean");

    let mut m = Machine::new(&unit);
    let x = m.alloc_f64(&[1.0, 2.0, 3.0]);
    let w = m.alloc_f64(&[1.0, 1.0, 2.0]);
    let r = m.call("wmean", &[x, w, VmValue::I(3)]).unwrap();
    assert_eq!(r, Some(VmValue::F(9.0 / 4.0)));
}

#[test]
fn test_loop_iteration_count_tracks_input() {
    let source = r#"
        int count_below (double * x, int n, double limit)
        {
          int c;
          int i;

          <bb 2>:
            c = 0;
            i = 0;
            goto <bb 6>;

          <bb 3>:
            if (x[i] < limit) goto <bb 4>; else goto <bb 5>;

          <bb 4>:
            c = c + 1;
            goto <bb 5>;

          <bb 5>:
            i = i + 1;
            goto <bb 6>;

          <bb 6>:
            if (i < n) goto <bb 3>; else goto <bb 7>;

          <bb 7>:
            return c;
        }
    "#;
    let unit = compile_one("count", source);

    let mut m = Machine::new(&unit);
    let x = m.alloc_f64(&[0.5, 2.0, 0.1, 3.0, 0.9]);
    let r = m
        .call("count_below", &[x, VmValue::I(5), VmValue::F(1.0)])
        .unwrap();
    assert_eq!(r, Some(VmValue::I(3)));

    // The loop check runs once per element plus the final exit test, and
    // the body branch is taken once per element.
    let taken_for_5 = m.stats.branches_taken;
    let mut m2 = Machine::new(&unit);
    let x2 = m2.alloc_f64(&[0.5, 2.0]);
    m2.call("count_below", &[x2, VmValue::I(2), VmValue::F(1.0)])
        .unwrap();
    assert!(m2.stats.branches_taken < taken_for_5);
}

#[test]
fn test_multi_file_package_with_internal_call() {
    let front_end = TextFrontEnd::new()
        .with(
            "sq.c",
            r#"
            double square (double x)
            {
              double r;

              <bb 2>:
                r = x * x;
                return r;
            }
            "#,
        )
        .with(
            "dist.c",
            r#"
            double dist2 (double ax, double ay, double bx, double by)
            {
              double dx;
              double dy;
              double r;

              <bb 2>:
                dx = ax - bx;
                dy = ay - by;
                dx = square (dx);
                dy = square (dy);
                r = dx + dy;
                return r;
            }
            "#,
        );
    let table = ReferenceMethodTable::standard();
    let compiler = PackageCompiler::new(&front_end, &table, CompileOptions::new("geom", "out"));
    let (unit, _) = compiler
        .compile_unit(&[PathBuf::from("sq.c"), PathBuf::from("dist.c")])
        .unwrap();
    assert_eq!(unit.methods.len(), 2);

    let mut m = Machine::new(&unit);
    let r = m
        .call(
            "dist2",
            &[
                VmValue::F(0.0),
                VmValue::F(0.0),
                VmValue::F(3.0),
                VmValue::F(4.0),
            ],
        )
        .unwrap();
    assert_eq!(r, Some(VmValue::F(25.0)));
}

#[test]
fn test_globals_persist_across_calls() {
    let unit = compile_one(
        "counter",
        r#"
        int hits = 0;

        int bump ()
        {
          int v;

          <bb 2>:
            v = hits + 1;
            hits = v;
            return v;
        }
        "#,
    );
    let mut m = Machine::new(&unit);
    assert_eq!(m.call("bump", &[]).unwrap(), Some(VmValue::I(1)));
    assert_eq!(m.call("bump", &[]).unwrap(), Some(VmValue::I(2)));
    assert_eq!(m.call("bump", &[]).unwrap(), Some(VmValue::I(3)));
}

#[test]
fn test_record_fields_flatten_to_cells() {
    let unit = compile_one(
        "accum",
        r#"
        struct acc { double sum; int count; };

        void add (struct acc * a, double v)
        {
          double s;
          int c;

          <bb 2>:
            s = a->sum;
            s = s + v;
            a->sum = s;
            c = a->count;
            c = c + 1;
            a->count = c;
            return;
        }
        "#,
    );
    let mut m = Machine::new(&unit);
    let acc = m.alloc(vec![VmValue::F(0.0), VmValue::I(0)]);
    m.call("add", &[acc, VmValue::F(2.5)]).unwrap();
    m.call("add", &[acc, VmValue::F(1.5)]).unwrap();
    let cells = m.region(&acc).unwrap();
    assert_eq!(cells[0], VmValue::F(4.0));
    assert_eq!(cells[1], VmValue::I(2));
}

#[test]
fn test_write_through_null_pointer_traps() {
    let unit = compile_one(
        "nullw",
        r#"
        void write (double * p, double v)
        {
          <bb 2>:
            *p = v;
            return;
        }
        "#,
    );
    let mut m = Machine::new(&unit);
    let err = m
        .call("write", &[VmValue::Null, VmValue::F(1.0)])
        .unwrap_err();
    assert!(matches!(err, Trap::NullDeref));
}

#[test]
fn test_artifact_written_once_and_matches_memory() {
    let dir = tempfile::tempdir().unwrap();
    let front_end = TextFrontEnd::new().with(
        "one.c",
        r#"
        int one ()
        {
          <bb 2>:
            return 1;
        }
        "#,
    );
    let table = ReferenceMethodTable::standard();
    let compiler = PackageCompiler::new(
        &front_end,
        &table,
        CompileOptions::new("tiny", dir.path()),
    );
    let summary = compiler.compile(&[PathBuf::from("one.c")]).unwrap();
    assert_eq!(summary.class, "tiny.Tiny");
    assert_eq!(summary.sources_compiled, 1);

    let on_disk = std::fs::read(&summary.artifact_path).unwrap();
    assert_eq!(on_disk.len(), summary.artifact_bytes);
    let (unit, _) = compiler.compile_unit(&[PathBuf::from("one.c")]).unwrap();
    assert_eq!(on_disk, unit.to_bytes());
}

#[test]
fn test_empty_package_writes_empty_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let front_end = TextFrontEnd::new();
    let table = ReferenceMethodTable::standard();
    let compiler = PackageCompiler::new(
        &front_end,
        &table,
        CompileOptions::new("hollow", dir.path()),
    );
    // Only unrecognized inputs: no error, an artifact with zero methods.
    let summary = compiler
        .compile(&[PathBuf::from("NAMESPACE"), PathBuf::from("data.rda")])
        .unwrap();
    assert_eq!(summary.sources_compiled, 0);
    assert_eq!(summary.sources_skipped, 2);
    assert_eq!(summary.methods, 0);
    assert!(summary.artifact_path.exists());
}

#[test]
fn test_summary_serializes_to_json() {
    let dir = tempfile::tempdir().unwrap();
    let front_end = TextFrontEnd::new();
    let table = ReferenceMethodTable::standard();
    let compiler = PackageCompiler::new(
        &front_end,
        &table,
        CompileOptions::new("meta", dir.path()),
    );
    let summary = compiler.compile(&[]).unwrap();
    let json = serde_json::to_string(&summary).unwrap();
    let back: gimbal::CompileSummary = serde_json::from_str(&json).unwrap();
    assert_eq!(back.class, summary.class);
    assert_eq!(back.artifact_bytes, summary.artifact_bytes);
}
