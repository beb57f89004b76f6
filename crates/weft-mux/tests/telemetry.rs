use weft_mux::telemetry::{TelemetryError, install};

#[test]
fn install_succeeds_once_then_reports_already_installed() {
    install().expect("首次安装成功");
    tracing::info!(target: "weft_mux::telemetry", "subscriber installed");

    let err = install().expect_err("重复安装应失败");
    assert!(matches!(err, TelemetryError::AlreadyInstalled));
    assert_eq!(err.code(), "telemetry.already_installed");
}
