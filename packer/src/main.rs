//! Shim binary that calls into the `packer` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;

fn main() -> Result<()> {
    // Delegate to library entrypoint
    luapack_packer::inner_main(luapack_packer::cli::Cli::parse())
}
