//! Lists every entry in a ZIP archive passed as the first argument.

use std::env;
use std::fs::File;

use archive_formats::zip_open;

fn main() {
    tracing_subscriber::fmt::init();
    let path = env::args().nth(1).expect("usage: list_zip <path>");
    let file = File::open(&path).expect("failed to open archive");
    let archive = zip_open(file).expect("failed to open zip archive");

    for index in 0..archive.len() {
        let info = archive.entry_info(index).expect("failed to read central directory entry");
        println!("{}\t{}\t{:?}", info.size, info.name, info.kind);
    }
}
