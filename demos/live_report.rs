//! Trace a synthetic workload and print a live allocation report.
//!
//! Run with: cargo run --example live_report

use std::collections::VecDeque;

#[inline(never)]
fn load_asset(size: usize) -> *mut u8 {
    livealloc::alloc(size)
}

#[inline(never)]
fn simulate_particles(budget: usize) -> Vec<*mut u8> {
    let mut particles = Vec::new();
    for _ in 0..budget {
        particles.push(livealloc::alloc(48));
    }
    particles
}

#[inline(never)]
fn grow_scratch(ptr: *mut u8, size: usize) -> *mut u8 {
    unsafe { livealloc::realloc(ptr, size) }
}

fn main() {
    livealloc::init();

    // A handful of "frames" with mixed allocation behavior: long-lived
    // assets, short-lived particle bursts, and a growing scratch buffer.
    let mut assets = VecDeque::new();
    let mut scratch = std::ptr::null_mut();
    for frame in 0..120usize {
        assets.push_back(load_asset(4096 + frame * 16));
        if assets.len() > 32 {
            if let Some(old) = assets.pop_front() {
                unsafe { livealloc::dealloc(old) };
            }
        }

        let particles = simulate_particles(200);
        for particle in particles {
            unsafe { livealloc::dealloc(particle) };
        }

        scratch = grow_scratch(scratch, 1024 * (frame + 1));

        livealloc::display(1.0 / 60.0);
    }

    livealloc::flush();

    let snapshot = livealloc::snapshot().expect("tracer is running");
    println!("live bytes: {}", livealloc::format_bytes(snapshot.total_live_bytes()));
    println!("\ntop allocating functions:");
    for function in snapshot.top_functions(10) {
        println!(
            "  {:>12}  {}",
            livealloc::format_bytes(function.total_bytes()),
            function.name()
        );
    }

    println!("\ncall graph roots:");
    for root in snapshot.roots() {
        let name = root
            .function()
            .map(|f| f.name().to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "  {:>12}  {} ({} callees)",
            livealloc::format_bytes(root.total_bytes()),
            name,
            root.children().count()
        );
    }
    drop(snapshot);

    println!("\n{}", livealloc::stats());

    // Leak the remaining assets on purpose; the report above shows them
    // as live.
    unsafe { livealloc::dealloc(scratch) };
    livealloc::exit();
}
