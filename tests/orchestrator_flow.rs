#![cfg(unix)]

//! End-to-end orchestration against a fake engine: a shell script posing as
//! the venv's Python interpreter, so every stage runs for real without any
//! external tool installed.

use markbridge::config::Config;
use markbridge::engine::{ConversionEngine, ConversionOptions, OverwritePolicy};
use markbridge::orchestrator::{ConversionRequest, Orchestrator, doctor};
use markbridge::process::CancelFlag;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const SCRIPT_NAMES: [&str; 5] = [
    "markitdown_wrapper.py",
    "docling_convert.py",
    "docling_v5_convert.py",
    "paddle_convert.py",
    "marker_convert.py",
];

/// Fake interpreter bodies. The orchestrator invokes
/// `python <script> <input> -o <staged>`, so `$4` is the staged output path.
const PY_WRITES_OUTPUT: &str = "#!/bin/sh\necho converted > \"$4\"\n";
const PY_SILENT_SUCCESS: &str = "#!/bin/sh\nexit 0\n";
const PY_FAILS: &str = "#!/bin/sh\necho engine blew up >&2\nexit 3\n";
const PY_WRITES_THEN_FAILS: &str = "#!/bin/sh\necho converted > \"$4\"\nexit 3\n";

struct Fixture {
    root: tempfile::TempDir,
    cfg: Config,
}

impl Fixture {
    fn new(python_body: &str) -> Self {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("envs/.venv_markitdown/bin");
        fs::create_dir_all(&bin).unwrap();
        let python = bin.join("python");
        fs::write(&python, python_body).unwrap();
        let mut perms = fs::metadata(&python).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&python, perms).unwrap();

        let scripts = root.path().join("scripts");
        fs::create_dir_all(&scripts).unwrap();
        for name in SCRIPT_NAMES {
            fs::write(scripts.join(name), "# wrapper placeholder\n").unwrap();
        }

        let mut cfg = Config::default();
        cfg.paths.envs_dir = root.path().join("envs").display().to_string();
        cfg.paths.scripts_dir = scripts.display().to_string();
        cfg.paths.work_dir = root.path().join("work").display().to_string();
        cfg.paths.out_dir = root.path().join("out").display().to_string();
        Self { root, cfg }
    }

    /// Add another family's fake venv alongside the markitdown one.
    fn add_env(&self, venv_dir: &str, python_body: &str) {
        let bin = self.root.path().join("envs").join(venv_dir).join("bin");
        fs::create_dir_all(&bin).unwrap();
        let python = bin.join("python");
        fs::write(&python, python_body).unwrap();
        let mut perms = fs::metadata(&python).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&python, perms).unwrap();
    }

    fn input(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, "dummy document").unwrap();
        path
    }

    fn out_dir(&self) -> PathBuf {
        self.root.path().join("out")
    }

    fn request(&self, input: &Path) -> ConversionRequest {
        ConversionRequest {
            input: input.to_path_buf(),
            engine: ConversionEngine::MarkItDown,
            backend: None,
            options: ConversionOptions::default(),
            out_dir: self.out_dir(),
        }
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(&self.cfg).expect("orchestrator")
    }

    fn staging_is_empty(&self) -> bool {
        let work = self.root.path().join("work");
        !work.exists() || fs::read_dir(work).unwrap().next().is_none()
    }
}

#[test]
fn missing_input_fails_before_environment_checks() {
    // No venv exists at all; a dead input path must still win.
    let fx = Fixture::new(PY_WRITES_OUTPUT);
    fs::remove_dir_all(fx.root.path().join("envs")).unwrap();
    let req = fx.request(Path::new("/no/such/file.pdf"));
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());
    assert_eq!(result.error.as_ref().unwrap().kind(), "input_not_found");
}

#[test]
fn unsupported_extension_is_rejected_without_launching() {
    let fx = Fixture::new(PY_WRITES_OUTPUT);
    let input = fx.input("archive.zip");
    let req = fx.request(&input);
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());
    assert_eq!(result.error.as_ref().unwrap().kind(), "unsupported_input");
}

#[test]
fn invalid_environment_is_terminal() {
    let fx = Fixture::new(PY_WRITES_OUTPUT);
    fs::remove_dir_all(fx.root.path().join("envs")).unwrap();
    let input = fx.input("doc.pdf");
    let req = fx.request(&input);
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());
    assert_eq!(
        result.error.as_ref().unwrap().kind(),
        "environment_unavailable"
    );
}

#[test]
fn successful_conversion_lands_at_the_suffixed_destination() {
    let fx = Fixture::new(PY_WRITES_OUTPUT);
    let input = fx.input("doc.pdf");
    let req = fx.request(&input);
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());

    assert!(result.succeeded(), "{:?}", result.error);
    let output = result.output.as_ref().unwrap();
    assert_eq!(output, &fx.out_dir().join("doc_markitdown.md"));
    assert_eq!(fs::read_to_string(output).unwrap().trim(), "converted");
    assert!(fx.staging_is_empty());
}

#[test]
fn clean_exit_without_output_is_a_reconciliation_failure() {
    let fx = Fixture::new(PY_SILENT_SUCCESS);
    let input = fx.input("doc.pdf");
    let req = fx.request(&input);
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());
    assert_eq!(
        result.error.as_ref().unwrap().kind(),
        "output_reconciliation_failure"
    );
    assert!(fx.staging_is_empty());
}

#[test]
fn nonzero_exit_without_output_reports_the_captured_tail() {
    let fx = Fixture::new(PY_FAILS);
    let input = fx.input("doc.pdf");
    let req = fx.request(&input);
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());
    let err = result.error.as_ref().unwrap();
    assert_eq!(err.kind(), "process_execution_failure");
    assert!(err.to_string().contains("engine blew up"));
    assert!(fx.staging_is_empty());
}

#[test]
fn produced_output_beats_a_nonzero_exit_code() {
    let fx = Fixture::new(PY_WRITES_THEN_FAILS);
    let input = fx.input("doc.pdf");
    let req = fx.request(&input);
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());
    assert!(result.succeeded(), "{:?}", result.error);
    assert!(fx.out_dir().join("doc_markitdown.md").is_file());
}

#[test]
fn skip_policy_leaves_the_existing_file_alone() {
    let fx = Fixture::new(PY_WRITES_OUTPUT);
    let input = fx.input("doc.pdf");
    fs::create_dir_all(fx.out_dir()).unwrap();
    let existing = fx.out_dir().join("doc_markitdown.md");
    fs::write(&existing, "precious").unwrap();

    let mut req = fx.request(&input);
    req.options.overwrite = OverwritePolicy::Skip;
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());

    assert_eq!(result.error.as_ref().unwrap().kind(), "destination_exists");
    assert_eq!(fs::read_to_string(&existing).unwrap(), "precious");
}

#[test]
fn rename_policy_picks_the_next_free_name() {
    let fx = Fixture::new(PY_WRITES_OUTPUT);
    let input = fx.input("doc.pdf");
    fs::create_dir_all(fx.out_dir()).unwrap();
    let existing = fx.out_dir().join("doc_markitdown.md");
    fs::write(&existing, "precious").unwrap();

    let mut req = fx.request(&input);
    req.options.overwrite = OverwritePolicy::Rename;
    let result = fx.orchestrator().convert_one(&req, &CancelFlag::new());

    assert!(result.succeeded(), "{:?}", result.error);
    assert_eq!(
        result.output.as_ref().unwrap(),
        &fx.out_dir().join("doc_markitdown (1).md")
    );
    assert_eq!(fs::read_to_string(&existing).unwrap(), "precious");
}

#[test]
fn pre_cancelled_requests_never_launch() {
    let fx = Fixture::new(PY_WRITES_OUTPUT);
    let input = fx.input("doc.pdf");
    let req = fx.request(&input);
    let cancel = CancelFlag::new();
    cancel.cancel();
    let result = fx.orchestrator().convert_one(&req, &cancel);
    assert_eq!(result.error.as_ref().unwrap().kind(), "cancelled");
    assert!(!fx.out_dir().join("doc_markitdown.md").exists());
}

#[test]
fn concurrent_engines_over_one_input_stay_isolated() {
    // Both fakes sleep so the two conversions overlap in real time. The
    // markitdown invocation receives `<input> -o <staged>` ($4 is the
    // staged path); docling receives `<input> <staged> --image-mode ...`
    // ($3 is the staged path).
    let fx = Fixture::new("#!/bin/sh\nsleep 0.3\necho standard > \"$4\"\n");
    fx.add_env(
        ".venv_docling",
        "#!/bin/sh\nsleep 0.3\necho structured > \"$3\"\n",
    );
    let input = fx.input("doc.pdf");
    let req_standard = fx.request(&input);
    let mut req_structured = fx.request(&input);
    req_structured.engine = ConversionEngine::DoclingCpu;

    let orch = fx.orchestrator();
    let (a, b) = std::thread::scope(|scope| {
        let a = scope.spawn(|| orch.convert_one(&req_standard, &CancelFlag::new()));
        let b = scope.spawn(|| orch.convert_one(&req_structured, &CancelFlag::new()));
        (a.join().unwrap(), b.join().unwrap())
    });

    assert!(a.succeeded(), "{:?}", a.error);
    assert!(b.succeeded(), "{:?}", b.error);
    let standard = fx.out_dir().join("doc_markitdown.md");
    let structured = fx.out_dir().join("doc_docling_cpu.md");
    assert_eq!(a.output.as_ref().unwrap(), &standard);
    assert_eq!(b.output.as_ref().unwrap(), &structured);
    assert_eq!(fs::read_to_string(&standard).unwrap().trim(), "standard");
    assert_eq!(fs::read_to_string(&structured).unwrap().trim(), "structured");
    assert!(fx.staging_is_empty());
}

#[test]
fn doctor_reports_env_state_and_missing_scripts() {
    let fx = Fixture::new(PY_WRITES_OUTPUT);
    fs::remove_file(fx.root.path().join("scripts/marker_convert.py")).unwrap();
    // Old pre-split layout alongside the per-family venvs.
    fs::create_dir_all(fx.root.path().join("envs/.venv")).unwrap();

    let report = doctor(&fx.cfg, &CancelFlag::new());

    let markitdown = report
        .envs
        .iter()
        .find(|e| e.family == "markitdown")
        .unwrap();
    assert!(markitdown.valid);
    let docling = report.envs.iter().find(|e| e.family == "docling").unwrap();
    assert!(!docling.valid);
    assert!(report.legacy_env.is_some());
    assert_eq!(report.missing_scripts, vec!["marker_convert.py"]);
}
