//! Build script for generating Rust code from Protocol Buffers

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile proto files
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .bytes(["."])
        .compile(
            &["proto/status.proto", "proto/master.proto", "proto/snode.proto"],
            &["proto"],
        )?;

    Ok(())
}
