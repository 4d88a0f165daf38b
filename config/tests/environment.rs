//! Capturing the real process environment. Kept in its own test binary so
//! mutating the environment cannot race with other tests.

use h3tm_config::EnvironmentSource;

#[cfg(unix)]
#[test]
fn process_environment_with_non_utf8_variables_is_captured() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    std::env::set_var("H3TM_TEST_UNRELATED", OsStr::from_bytes(b"\xff\xfe"));
    std::env::set_var("H3_S3_PREFIX", OsStr::from_bytes(b"\xff"));
    std::env::set_var("H3_S3_BUCKET", "env-bucket");

    let env = EnvironmentSource::from_process();
    assert_eq!(env.get("H3_S3_BUCKET"), Some("env-bucket"));
    assert_eq!(env.get("H3_S3_PREFIX"), None);
    assert_eq!(env.get("H3TM_TEST_UNRELATED"), None);
}
