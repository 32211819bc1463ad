//! 构建脚本：为 `asi` feature 选择 SDK 库目录
//!
//! SDK 的目录结构为 `<ASI_SDK_DIR>/lib/<platform>/libASICamera2.*`，
//! 这里根据目标平台挑选子目录并告诉 rustc 去哪里找库。

use std::env;
use std::path::PathBuf;

fn sdk_platform_dir(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("linux", "x86_64") => Some("x64"),
        ("linux", "x86") => Some("x86"),
        ("linux", "arm") => Some("armv7"),
        ("linux", "aarch64") => Some("armv8"),
        ("macos", "aarch64") => Some("mac_arm64"),
        ("macos", _) => Some("mac"),
        _ => None,
    }
}

fn main() {
    println!("cargo:rerun-if-env-changed=ASI_SDK_DIR");

    if env::var_os("CARGO_FEATURE_ASI").is_none() {
        return;
    }

    let os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    match (env::var_os("ASI_SDK_DIR"), sdk_platform_dir(&os, &arch)) {
        (Some(root), Some(platform)) => {
            let lib_dir = PathBuf::from(root).join("lib").join(platform);
            println!("cargo:rustc-link-search=native={}", lib_dir.display());
        },
        (None, _) => {
            println!(
                "cargo:warning=ASI_SDK_DIR is not set, relying on the system linker path for libASICamera2"
            );
        },
        (Some(_), None) => {
            println!("cargo:warning=ASI SDK has no prebuilt library for {os}/{arch}");
        },
    }

    println!("cargo:rustc-link-lib=dylib=ASICamera2");
}
