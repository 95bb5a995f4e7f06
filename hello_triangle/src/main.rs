pub mod hello_triangle;

const WINDOW_WIDTH: u32 = 640;
const WINDOW_HEIGHT: u32 = 360;

use windows::core::Result;

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().filter_or("RUST_LOG", "info"));
    let r = crate::hello_triangle::default_main(WINDOW_WIDTH, WINDOW_HEIGHT);
    r
}
