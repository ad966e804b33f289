use try_error::{configure, create_error, reset_config, try_sync, ConfigPatch};

fn load_configuration(path: &str) -> Result<(), try_error::TryError> {
    if path == "bad_config.toml" {
        return Err(create_error(
            "ConfigParseError",
            "Syntax error at line 42: unexpected EOF",
        ));
    }
    Ok(())
}

fn main() {
    reset_config();

    println!("--- Basic Usage ---\n");

    match load_configuration("bad_config.toml") {
        Ok(_) => println!("Success!"),
        Err(err) => {
            println!("1. [ERROR] {}", err.message());
            println!("   type:      {}", err.error_type());
            println!("   source:    {}", err.source());
            println!("   timestamp: {}", err.timestamp());
        }
    }

    println!("\n--- Configuring minimal errors for a hot path ---\n");
    let mut patch = ConfigPatch::new();
    patch.minimal_errors = Some(true);
    configure(patch).unwrap();

    let minimal = create_error("HotPathError", "skip the extras");
    println!("2. minimal error source:   {}", minimal.source());
    println!("   minimal error timestamp: {}", minimal.timestamp());

    reset_config();

    println!("\n--- try_sync captures panics as TryError ---\n");
    let result: Result<i32, _> = try_sync(|| {
        let values: Vec<i32> = vec![1, 2, 3];
        values[10]
    });
    match result {
        Ok(_) => println!("unreachable"),
        Err(err) => println!("3. caught panic as: {} / {}", err.error_type(), err.message()),
    }
}
