// build.rs

use std::env;

fn main() {
    // Release pipelines stamp the binary through TOKENRELAY_VERSION.
    let version = env::var("TOKENRELAY_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()));

    println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    println!("cargo:rerun-if-env-changed=TOKENRELAY_VERSION");
}
