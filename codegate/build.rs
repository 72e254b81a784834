fn main() {
    // Re-run migrations embedding when the SQL changes.
    println!("cargo:rerun-if-changed=migrations");
    println!("cargo:rerun-if-changed=signatures.yaml");
}
