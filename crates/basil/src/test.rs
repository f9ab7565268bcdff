use super::*;

use std::io::Cursor;

use nibble_machine::assembler::AssemblerErrorKind;
use nibble_machine::image::Slot;
use nibble_machine::{Machine, MachineConfig, Opcode};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("basil-{}-{name}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn stream_host_reads_until_eof() -> Result<(), MachineError> {
    let mut host = StreamHost::new(Cursor::new(b"ab".to_vec()), Vec::new());
    assert_eq!(host.get()?, Some(b'a'));
    assert_eq!(host.get()?, Some(b'b'));
    assert_eq!(host.get()?, None);
    Ok(())
}

#[test]
fn stream_host_writes_each_byte() -> Result<(), MachineError> {
    let mut host = StreamHost::new(io::empty(), Vec::new());
    host.put(b'o')?;
    host.put(b'k')?;
    assert_eq!(host.into_output(), b"ok".to_vec());
    Ok(())
}

#[test]
fn stream_host_publishes_counter() {
    let mut host = StreamHost::new(io::empty(), io::sink());
    let counter = host.counter();
    host.trace(Trace::Fetch {
        counter: 42,
        next: 43,
        slot: Slot {
            byte_index: 21,
            selector: 0,
            byte: 0xA0,
            nibble: 0xA,
        },
    });
    host.trace(Trace::Execute(Opcode::Dup));
    assert_eq!(counter.load(Ordering::Relaxed), 43);
}

#[test]
fn published_counter_matches_fault_counter() {
    // `get` with no input: the value an interrupt would print while blocked
    // there must be the one the fault reports.
    let image = nibble_machine::image::pack(&[Opcode::Get.nibble()], Default::default());
    let mut host = StreamHost::new(io::empty(), io::sink());
    let counter = host.counter();
    let mut machine = Machine::new(&image, MachineConfig::default());
    let fault = machine.step(&mut host).unwrap_err();
    assert_eq!(fault.error, MachineError::EndOfInput);
    assert_eq!(counter.load(Ordering::Relaxed), fault.counter);
    assert_eq!(fault.counter, 1);
}

#[test]
fn published_counter_follows_branches() -> Result<(), Fault> {
    // push 6, push 1, br -> 6: get
    let program = [0, 6, 0, 1, Opcode::Br.nibble(), 15, Opcode::Get.nibble()];
    let image = nibble_machine::image::pack(&program, Default::default());
    let mut host = StreamHost::new(io::empty(), io::sink());
    let counter = host.counter();
    let mut machine = Machine::new(&image, MachineConfig::default());
    for _ in 0..5 {
        machine.step(&mut host)?;
    }
    assert_eq!(machine.counter(), 6);
    let fault = machine.step(&mut host).unwrap_err();
    assert_eq!(fault.counter, 7);
    assert_eq!(counter.load(Ordering::Relaxed), fault.counter);
    Ok(())
}

#[test]
fn echo_program_runs_against_streams() {
    let assembly = assemble_source(
        Path::new("echo.s"),
        "loop: push loop\nget put\npush 1 br\n",
        AssemblerOptions::default(),
    )
    .unwrap();
    let mut host = StreamHost::new(Cursor::new(b"hey".to_vec()), Vec::new());
    let mut machine = Machine::new(&assembly.image, MachineConfig::default());
    let fault = machine.run(&mut host);
    assert_eq!(fault.error, MachineError::EndOfInput);
    assert_eq!(host.into_output(), b"hey".to_vec());
}

#[test]
fn assembly_errors_name_the_file() {
    let err = assemble_source(Path::new("bad.s"), "dup\npush", AssemblerOptions::default())
        .unwrap_err();
    assert_eq!(err.to_string(), "bad.s:2: push requires an immediate operand");
    assert_eq!(err.exit_code(), EXIT_FAILURE);
    match err {
        AppError::Assemble { error, .. } => {
            assert_eq!(error.error_kind(), &AssemblerErrorKind::MissingPushOperand);
        }
        _ => panic!("expected an assembly error"),
    }
}

#[test]
fn assembly_errors_without_a_line_keep_a_separator() {
    let err = AppError::Assemble {
        path: "prog.s".to_string(),
        error: AssemblerError::Kind(AssemblerErrorKind::ProgramCounterOverflow),
    };
    assert_eq!(err.to_string(), "prog.s: program counter overflow");
}

#[test]
fn exit_codes_follow_error_class() {
    let fault = AppError::Fault(Fault {
        counter: 7,
        error: MachineError::StackUnderflow,
    });
    assert_eq!(fault.exit_code(), EXIT_FAULT);
    assert_eq!(fault.to_string(), "underflow: pc = 7");

    let allocation = AppError::Allocation {
        path: "big.bin".to_string(),
        size: u64::MAX,
    };
    assert_eq!(allocation.exit_code(), EXIT_RESOURCE);
    assert_eq!(interrupted_message(12), "interrupted: pc = 12");
}

#[test]
fn missing_image_is_an_open_error() {
    let dir = scratch_dir("missing");
    let err = load_image(&dir.join("nothing.bin")).unwrap_err();
    assert!(matches!(err, AppError::OpenImage { .. }));
    assert_eq!(err.exit_code(), EXIT_FAILURE);
}

#[test]
fn assemble_file_writes_image_and_artifacts() {
    let dir = scratch_dir("artifacts");
    let source = dir.join("prog.s");
    let output = dir.join("prog.bin");
    fs::write(&source, "start: push 5\npush 3 add put\n").unwrap();

    let options = AssemblerOptions {
        keep_intermediates: true,
        ..AssemblerOptions::default()
    };
    assemble_file(&source, &output, options).unwrap();

    assert_eq!(load_image(&output).unwrap(), vec![0x05, 0x03, 0x6D]);
    assert_eq!(
        fs::read_to_string(artifact_path(&output, "sym")).unwrap(),
        "start: 0\n"
    );
    assert_eq!(
        fs::read_to_string(artifact_path(&output, "1")).unwrap(),
        "start:\npush 5\npush 3 add put\n"
    );
    assert_eq!(
        fs::read_to_string(artifact_path(&output, "2")).unwrap(),
        "push 5\npush 3 add put\n"
    );
    assert_eq!(
        fs::read_to_string(artifact_path(&output, "3")).unwrap(),
        "push 5\npush 3 add put\n"
    );
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn artifacts_are_skipped_by_default() {
    let dir = scratch_dir("plain");
    let source = dir.join("prog.s");
    let output = dir.join("prog.bin");
    fs::write(&source, "dup\n").unwrap();

    assemble_file(&source, &output, AssemblerOptions::default()).unwrap();
    assert!(output.exists());
    assert!(!artifact_path(&output, "sym").exists());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn artifact_path_appends_suffix() {
    assert_eq!(
        artifact_path(Path::new("out/prog.bin"), "sym"),
        PathBuf::from("out/prog.bin.sym")
    );
}
