fn main() {
    println!("cargo:rerun-if-changed=proto/redo_cdc.proto");
    prost_build::Config::new()
        .compile_protos(&["proto/redo_cdc.proto"], &["proto/"])
        .expect("failed to compile control-protocol proto");
}
