fn main() {
    if let Err(err) = pkg_config::Config::new().atleast_version("1.3").probe("hivex") {
        panic!(
            "could not locate libhivex via pkg-config (install libhivex-dev / hivex-devel): {err}"
        );
    }
}
