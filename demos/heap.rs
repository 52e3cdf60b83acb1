use std::io::Read;

use tagheap::{AllocError, Allocator, Handle, HeapConfig};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect the mappings with `pmap` or
/// `/proc/<pid>/maps` while the heap grows and shrinks.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_heap(
  label: &str,
  allocator: &Allocator,
) {
  println!(
    "[{}] PID = {}, capacity = {}, high-water mark = {}, live = {} ({} bytes)",
    label,
    std::process::id(),
    allocator.capacity(),
    allocator.high_water_mark(),
    allocator.stats().count,
    allocator.stats().bytes,
  );

  for block in allocator.blocks() {
    println!(
      "    {:>6}  {:>6} bytes  {}",
      block.offset,
      block.payload,
      if block.used { "used" } else { "free" }
    );
  }
}

fn print_alloc(
  allocator: &Allocator,
  bytes: usize,
  handle: Handle,
) -> Result<(), AllocError> {
  println!(
    "Allocated {} bytes, handle = {:?}, address = {:?}",
    bytes,
    handle,
    allocator.access(handle)?
  );
  Ok(())
}

fn main() -> Result<(), AllocError> {
  let config = HeapConfig::from_env()?;
  let mut allocator = Allocator::with_config(config)?;

  print_heap("start", &allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) Three neighbouring blocks.
  // --------------------------------------------------------------------
  let a = allocator.allocate(100)?;
  let b = allocator.allocate(100)?;
  let c = allocator.allocate(100)?;
  println!("\n[1] Allocate three blocks of 100 bytes");
  for handle in [a, b, c] {
    print_alloc(&allocator, 100, handle)?;
  }

  unsafe {
    allocator.payload_mut(b)?.fill(0xAB);
  }
  print_heap("1", &allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) Free the middle one, then the first: they merge.
  // --------------------------------------------------------------------
  unsafe {
    allocator.free(b)?;
    allocator.free(a)?;
  }
  println!("\n[2] Free B then A");
  print_heap("2", &allocator);

  match unsafe { allocator.free(b) } {
    Err(AllocError::DoubleFree(_)) | Err(AllocError::InvalidHandle(_)) => {
      println!("[2] Freeing B again is rejected")
    }
    other => println!("[2] Unexpected result: {:?}", other),
  }
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) A smaller request reuses the merged block and splits it.
  // --------------------------------------------------------------------
  let d = allocator.allocate(40)?;
  println!("\n[3] Allocate 40 bytes (first fit)");
  print_alloc(&allocator, 40, d)?;
  println!("[3] d == a? {}", d == a);
  print_heap("3", &allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Push the heap past its initial capacity.
  // --------------------------------------------------------------------
  let before = allocator.capacity();
  let burst = (0..64)
    .map(|_| allocator.allocate(256))
    .collect::<Result<Vec<_>, _>>()?;
  println!(
    "\n[4] Allocated {} blocks of 256 bytes, capacity {} -> {}",
    burst.len(),
    before,
    allocator.capacity()
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Give it all back; the heap shrinks.
  // --------------------------------------------------------------------
  let peak = allocator.capacity();
  unsafe {
    for handle in burst {
      allocator.free(handle)?;
    }
  }
  println!("\n[5] Freed the burst, capacity {} -> {}", peak, allocator.capacity());
  print_heap("5", &allocator);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 6) A large request bypasses the heap entirely.
  // --------------------------------------------------------------------
  let large_size = allocator.config().large_threshold;
  let large = allocator.allocate(large_size)?;
  println!("\n[6] Allocate {} bytes (own mapping)", large_size);
  print_alloc(&allocator, large_size, large)?;
  print_heap("6", &allocator);
  unsafe { allocator.free(large)? };
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 7) End of demo.
  // --------------------------------------------------------------------
  unsafe {
    allocator.free(c)?;
    allocator.free(d)?;
  }
  println!("\n[7] End of example, releasing the heap.");
  allocator.teardown()
}
