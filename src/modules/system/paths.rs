use std::fs;
use std::path::PathBuf;

pub fn get_data_dir() -> Result<PathBuf, String> {
    let dir = if let Ok(custom) = std::env::var("APISCRIBE_DATA_DIR") {
        PathBuf::from(custom)
    } else {
        let home = dirs::home_dir().ok_or("Failed to get home directory")?;
        home.join(".apiscribe")
    };

    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create data directory: {}", e))?;
    }

    Ok(dir)
}

pub fn get_db_path() -> Result<PathBuf, String> {
    Ok(get_data_dir()?.join("requests.db"))
}
