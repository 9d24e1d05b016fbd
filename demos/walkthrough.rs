use std::io::Read;

use rheap::{Heap, HEADER_SIZE};

/// Waits until the user presses ENTER when `--pause` was given.
/// Useful to inspect the program break with `pmap` or `gdb` between steps.
fn pause(enabled: bool) {
  if enabled {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

/// Prints the current program break using `sbrk(0)`.
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { libc::sbrk(0) },
  );
}

fn main() {
  // RUST_LOG=debug (or trace) shows every split, merge and index operation.
  env_logger::init();

  let paused = std::env::args().any(|arg| arg == "--pause");
  let mut heap = Heap::new();

  print_program_break("start");
  heap.init(1024).expect("init 1 KiB region");
  print_program_break("after init");
  println!("header size = {} bytes", HEADER_SIZE);
  pause(paused);

  // --------------------------------------------------------------------
  // 1) Two allocations carved from the single initial block.
  // --------------------------------------------------------------------
  let first = heap.allocate(100).expect("allocate 100");
  let second = heap.allocate(200).expect("allocate 200");
  println!("\n[1] first = {:?}, second = {:?}", first, second);
  heap.log_layout();
  pause(paused);

  // --------------------------------------------------------------------
  // 2) Growing a block moves it and keeps its content.
  // --------------------------------------------------------------------
  unsafe { first.as_ptr().write_bytes(0xAB, 100) };
  let grown = heap
    .resize(first.as_ptr(), 160)
    .expect("resize to 160")
    .expect("non-zero size");
  println!(
    "\n[2] resized {:?} -> {:?}, first byte = {:#X}",
    first,
    grown,
    unsafe { grown.as_ptr().read() }
  );
  heap.log_layout();
  pause(paused);

  // --------------------------------------------------------------------
  // 3) Releasing everything coalesces back into one block.
  // --------------------------------------------------------------------
  heap.release(second.as_ptr()).expect("release second");
  heap.release(grown.as_ptr()).expect("release grown");
  println!(
    "\n[3] free blocks = {}, free bytes = {}",
    heap.free_block_count(),
    heap.free_bytes()
  );
  pause(paused);

  // --------------------------------------------------------------------
  // 4) The whole region minus one header fits exactly; one byte more does not.
  // --------------------------------------------------------------------
  let whole = heap.allocate(1024 - HEADER_SIZE).expect("exact fit");
  println!("\n[4] exact fit at {:?}", whole);
  heap.release(whole.as_ptr()).expect("release exact fit");
  println!(
    "[4] allocate({}) -> {:?}",
    1024 - HEADER_SIZE + 1,
    heap.allocate(1024 - HEADER_SIZE + 1)
  );
  pause(paused);

  // --------------------------------------------------------------------
  // 5) Teardown forgets the region; the program break does not move back.
  // --------------------------------------------------------------------
  heap.teardown();
  print_program_break("after teardown");
  println!("\n[5] End of walkthrough.");
}
