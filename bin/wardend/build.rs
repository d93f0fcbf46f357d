//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "binary"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Build metadata capture for the Warden daemon."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Emits idempotent defaults when git metadata is unavailable.
    EmitBuilder::builder().all_cargo().all_git().emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
