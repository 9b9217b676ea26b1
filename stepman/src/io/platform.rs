//! Host platform names in the `<os>-<arch>` form used by registries and Go archives.

/// Operating system name as Go spells it (`darwin`, `linux`, `windows`).
pub fn go_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

/// CPU architecture as Go spells it (`amd64`, `arm64`).
pub fn go_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        other => other,
    }
}

/// Key used for per-platform executables, e.g. `linux-amd64`.
pub fn current_platform() -> String {
    format!("{}-{}", go_os(), go_arch())
}
