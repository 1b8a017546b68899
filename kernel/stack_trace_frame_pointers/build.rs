//! Sets the `frame_pointers` cfg when the crate is compiled with forced frame pointers,
//! since codegen options are not visible to `cfg!` on their own.

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_ENCODED_RUSTFLAGS");
    println!("cargo:rustc-check-cfg=cfg(frame_pointers)");

    let rustflags = match std::env::var("CARGO_ENCODED_RUSTFLAGS") {
        Ok(flags) => flags,
        Err(_) => {
            println!("cargo:warning=CARGO_ENCODED_RUSTFLAGS is not set; assuming no forced frame pointers");
            return;
        }
    };

    // flags are separated by 0x1F; "-C" and its value may be one flag or two
    let flags: Vec<&str> = rustflags.split('\x1f').collect();
    let forced = flags.iter().enumerate().any(|(i, flag)| {
        let option = match flag.strip_prefix("-C") {
            Some("") => flags.get(i + 1).copied().unwrap_or(""),
            Some(rest) => rest,
            None => flag.strip_prefix("--codegen=").unwrap_or(""),
        };
        matches!(option.trim(), "force-frame-pointers=yes" | "force-frame-pointers=true" | "force-frame-pointers=on" | "force-frame-pointers")
    });

    if forced {
        println!("cargo:rustc-cfg=frame_pointers");
    } else {
        println!("cargo:warning=frame pointers are not forced; fault backtraces may stop at the faulting frame");
    }
}
