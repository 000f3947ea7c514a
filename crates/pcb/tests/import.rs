use assert_cmd::Command;
use assert_fs::prelude::*;
use assert_fs::TempDir;
use std::fs;
use std::path::PathBuf;

fn pcb() -> Command {
    Command::cargo_bin("pcb").unwrap()
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("pcb-orcad2kicad")
        .join("test")
        .join(name)
}

fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_symbols_requires_scale() {
    let temp = TempDir::new().unwrap();
    let output = temp.child("orcad.kicad_sym");

    let result = pcb()
        .args(["import", "orcad", "symbols"])
        .arg(fixture("DISCRETE.log"))
        .arg("-o")
        .arg(output.path())
        .assert()
        .failure();
    assert!(stderr(result.get_output()).contains("scale"));
    assert!(!output.path().exists());
}

#[test]
fn test_symbols_writes_library() {
    let temp = TempDir::new().unwrap();
    let output = temp.child("orcad.kicad_sym");

    pcb()
        .args(["import", "orcad", "symbols", "--scale", "0.254"])
        .arg(fixture("DISCRETE.log"))
        .arg("-o")
        .arg(output.path())
        .assert()
        .success();

    let text = fs::read_to_string(output.path()).unwrap();
    assert!(text.starts_with("(kicad_symbol_lib"));
    assert!(text.contains("(symbol \"RES\""));
    assert!(text.contains("(symbol \"CAP\""));
}

#[test]
fn test_conflicting_symbols_write_nothing() {
    let temp = TempDir::new().unwrap();
    let output = temp.child("orcad.kicad_sym");

    let result = pcb()
        .args(["import", "orcad", "symbols", "--scale", "0.254"])
        .arg(fixture("OPAMP_A.json"))
        .arg(fixture("OPAMP_B.json"))
        .arg("-o")
        .arg(output.path())
        .assert()
        .failure();
    let err = stderr(result.get_output());
    assert!(err.contains("OPAMP1"), "{err}");
    assert!(!output.path().exists());
}

#[test]
fn test_schematic_writes_page_report_and_table() {
    let temp = TempDir::new().unwrap();
    let library = temp.child("orcad.kicad_sym");
    let config = temp.child("convert.toml");
    config.write_str("scale = \"0.254\"\n").unwrap();

    pcb()
        .args(["import", "orcad", "symbols", "--config"])
        .arg(config.path())
        .arg(fixture("DISCRETE.log"))
        .arg("-o")
        .arg(library.path())
        .assert()
        .success();

    // U9 has no symbol anywhere, so the run reports a diagnostic
    let result = pcb()
        .args(["import", "orcad", "schematic", "--config"])
        .arg(config.path())
        .arg("--library")
        .arg(library.path())
        .arg("--output-dir")
        .arg(temp.path())
        .arg(fixture("divider.xml"))
        .assert()
        .failure();
    assert!(stderr(result.get_output()).contains("unresolved"));

    let schematic = fs::read_to_string(temp.child("divider.kicad_sch").path()).unwrap();
    assert!(schematic.contains("(lib_id \"orcad:RES\")"));
    assert!(schematic.contains("(label \"VCC\""));

    let report = fs::read_to_string(temp.child("divider.unresolved.json").path()).unwrap();
    assert!(report.contains("LM358X"));

    let table = fs::read_to_string(temp.child("sym-lib-table").path()).unwrap();
    assert!(table.contains("${KIPRJMOD}/orcad.kicad_sym"));
}

#[test]
fn test_same_stem_inputs_write_nothing() {
    let temp = TempDir::new().unwrap();
    let library = temp.child("orcad.kicad_sym");
    pcb()
        .args(["import", "orcad", "symbols", "--scale", "0.254"])
        .arg(fixture("DISCRETE.log"))
        .arg("-o")
        .arg(library.path())
        .assert()
        .success();

    let xml = fs::read_to_string(fixture("divider.xml")).unwrap();
    let first = temp.child("a/divider.xml");
    let second = temp.child("b/divider.xml");
    first.write_str(&xml).unwrap();
    second.write_str(&xml).unwrap();
    let out = temp.child("out");

    let result = pcb()
        .args(["import", "orcad", "schematic", "--scale", "0.254"])
        .arg("--library")
        .arg(library.path())
        .arg("--output-dir")
        .arg(out.path())
        .arg(first.path())
        .arg(second.path())
        .assert()
        .failure();
    let err = stderr(result.get_output());
    assert!(err.contains("written twice"), "{err}");
    assert!(!out.child("divider.kicad_sch").path().exists());
    assert!(!out.child("divider.unresolved.json").path().exists());
    assert!(!out.child("sym-lib-table").path().exists());
}
