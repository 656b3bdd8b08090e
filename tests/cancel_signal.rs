#![cfg(unix)]

use markbridge::cli::install_cancel_handler;
use markbridge::process::CancelFlag;
use std::time::Duration;

// Lives alone in its own test binary: the handler is process-global and the
// test delivers a real SIGINT to the whole process.
#[test]
fn interrupt_raises_the_cancel_flag() {
    let cancel = CancelFlag::new();
    install_cancel_handler(&cancel);
    assert!(!cancel.is_cancelled());

    let status = std::process::Command::new("kill")
        .args(["-INT", &std::process::id().to_string()])
        .status()
        .expect("send SIGINT");
    assert!(status.success());

    // The handler runs on its own thread; give it a moment.
    for _ in 0..200 {
        if cancel.is_cancelled() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("cancel flag was never raised after SIGINT");
}
