use std::env;
use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rerun-if-changed=build.rs");

    let crate_dir = env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");

    let mut config = cbindgen::Config::default();
    config.language = cbindgen::Language::C;
    config.include_guard = Some(String::from("LIBRARY_STUB_H"));
    config.autogen_warning = Some(String::from(
        "/* Generated by cbindgen from src/ffi.rs and src/lib.rs. Do not edit. */",
    ));

    // Generate the C header for Objective-C / C callers
    let bindings = match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => bindings,
        Err(e) => {
            println!("cargo:warning=cbindgen generation failed: {}", e);
            return;
        }
    };

    let header_path = Path::new(&crate_dir).join("include/library_stub.h");
    if let Some(parent) = header_path.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            println!("cargo:warning=Failed to create include/ directory: {}", e);
        }
    }

    if !bindings.write_to_file(&header_path) {
        println!("cargo:warning=library_stub.h unchanged");
    }
}
