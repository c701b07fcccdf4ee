//! Walks the allocator through its three operations and prints what the
//! heap and the arena see at each step.

use cellheap::{Heap, MmapArena};

fn log_alloc(addr: *mut u8, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    let heap = Heap::new(MmapArena::new());

    unsafe {
        let a = heap.alloc(24);
        log_alloc(a, 24);

        let b = heap.alloc(500);
        log_alloc(b, 500);

        // Above the threshold: backed by dedicated whole pages.
        let c = heap.alloc(10_000);
        log_alloc(c, 10_000);

        println!("\nThreshold: {} bytes", heap.threshold());
        println!("Pages in use: {}", heap.arena().allocated_pages());

        let stats = heap.stats();
        for bucket in stats.buckets.iter().filter(|b| b.masses > 0) {
            println!(
                "class {:>4}: {} mass(es), {} used cell(s), {} free cell(s)",
                bucket.size, bucket.masses, bucket.used_cells, bucket.free_cells,
            );
        }
        println!("large blocks: {}", stats.large_blocks);

        let grown = heap.realloc(a, 2000);
        println!("\nGrew the first allocation: {a:?} -> {grown:?}");

        heap.free(grown);
        heap.free(b);
        heap.free(c);

        println!(
            "Pages in use after freeing everything: {}",
            heap.arena().allocated_pages()
        );
    }
}
