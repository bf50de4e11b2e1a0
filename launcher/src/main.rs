//! Shim binary that calls into the `launcher` library's `inner_main`.
//!
//! This is the stub every package starts with; the trailer appended to it decides what runs.

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Delegate to library entrypoint; all scoped resources are released before it returns
    let code = luapack_launcher::inner_main().await;
    std::process::exit(code);
}
