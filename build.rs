//! Generates Rust bindings for `fileformat.proto` and `osmformat.proto`.
//!
//! Uses `protobuf-codegen`'s pure-Rust `.proto` parser, so building this
//! crate does not require a system `protoc` binary.

fn main() {
    let proto_files = ["src/proto/fileformat.proto", "src/proto/osmformat.proto"];

    for path in &proto_files {
        println!("cargo:rerun-if-changed={path}");
    }

    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["src/proto"])
        .inputs(proto_files)
        .cargo_out_dir("proto")
        .run_from_script();
}
