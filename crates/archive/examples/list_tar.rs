//! Lists every entry in a TAR archive passed as the first argument.

use std::env;
use std::fs::File;

use archive_formats::tar_open;

fn main() {
    tracing_subscriber::fmt::init();
    let path = env::args().nth(1).expect("usage: list_tar <path>");
    let file = File::open(&path).expect("failed to open archive");

    for entry in tar_open(file) {
        let entry = entry.expect("failed to read tar entry");
        println!("{}\t{}\t{:?}", entry.info.size, entry.info.name, entry.info.kind);
    }
}
