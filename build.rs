use std::io::ErrorKind;

fn main() {
    let get_command_id = std::process::Command::new("git")
        .args([
            "describe",
            "--dirty",
            "--always",
            "--match",
            "__EXCLUDE__",
            "--abbrev=7",
        ])
        .output();
    let commit_id = match get_command_id {
        Ok(output) if output.status.success() => String::from_utf8(output.stdout)
            .unwrap_or_default()
            .trim()
            .to_string(),
        Ok(_) => String::new(),
        Err(err) => {
            if let ErrorKind::NotFound = err.kind() {
                println!("cargo:warning=`git` was not found, commit id is left empty");
            } else {
                println!("cargo:warning=error when get commit id: {}", err);
            }
            String::new()
        }
    };

    println!("cargo:rustc-env=COMMIT_ID={}", commit_id);
    println!("cargo:rerun-if-changed=.git/HEAD");
}
