use std::{env, fs, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=operations");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let out_operations = out_dir.join("operations");
    println!("cargo:rustc-env=OUT_OPERATIONS={}", out_operations.display());
    fs::create_dir_all(&out_operations).unwrap();

    for entry in fs::read_dir("operations").unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("graphql") {
            continue;
        }
        let file_name = path.file_name().unwrap();
        fs::copy(&path, out_operations.join(file_name)).unwrap();
    }
}
