fn main() {
    println!("cargo:rerun-if-changed=csrc/log_shim.c");
    cc::Build::new()
        .file("csrc/log_shim.c")
        .warnings(true)
        .compile("retrohost_log_shim");
}
