use std::fs::{self, File};
use std::io::Write;

use schemars::schema_for;
use splitpad::config::{
    layout::{KeyLayout, Keymap},
    EngineConfig,
};

const SCHEMA_DIR: &str = "./rootfs/usr/share/splitpad/schema";

fn main() {
    fs::create_dir_all(SCHEMA_DIR).expect("Failed to create schema directory");

    let schemas = [
        ("config.json", schema_for!(EngineConfig)),
        ("layout.json", schema_for!(KeyLayout)),
        ("keymap.json", schema_for!(Keymap)),
    ];
    for (name, schema) in schemas {
        let mut file =
            File::create(format!("{SCHEMA_DIR}/{name}")).expect("Failed to create schema file");
        write!(
            file,
            "{}",
            serde_json::to_string_pretty(&schema).expect("Failed to serialize schema")
        )
        .expect("Failed to write schema");
    }
}
