fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Build metadata (git hash, compiler, build time) shown in the CLI banner.
    built::write_built_file().expect("Failed to acquire build-time information");
}
