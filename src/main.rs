use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    confab::cli::main()
}
