// GameManager — Write-Directory Preparation
//
// Each game instance runs in an isolated directory tree: empty output
// subdirectories, symlinks into the user-shared content tree, the installed
// Bridge artifacts, a bootstrap widget that hands team control to the
// Bridge, and headless-friendly engine settings.
//
// Missing symlink sources are non-fatal: the engine may error later, that is
// its problem, but preparation must still succeed.

use crate::atoms::constants::{
    BOOTSTRAP_WIDGET, BRIDGE_AI_NAME, BRIDGE_AI_VERSION, BRIDGE_PLAYER_NAME,
};
use crate::atoms::error::GmResult;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Content-tree entries shared between instances via symlink.
const SHARED_LINKS: [&str; 6] = ["pool", "packages", "maps", "games", "engine", "rapid"];

/// Empty per-instance output directories.
const OUTPUT_DIRS: [&str; 2] = ["demos", "temp"];

#[derive(Debug, Clone)]
pub struct WriteDir {
    pub root: PathBuf,
    pub script_path: PathBuf,
}

/// Prepare the full per-instance tree under `root`.
///
/// `bridge_library` points at the built Bridge shared object; when it is
/// absent the metadata is still installed so the failure shows up in the
/// engine log rather than here.
pub fn prepare(
    root: &Path,
    data_root: &Path,
    bridge_library: Option<&Path>,
    token: &str,
    socket_path: &Path,
) -> GmResult<WriteDir> {
    for dir in OUTPUT_DIRS {
        fs::create_dir_all(root.join(dir))?;
    }

    for name in SHARED_LINKS {
        let source = data_root.join(name);
        let target = root.join(name);
        if target.exists() || target.is_symlink() {
            continue;
        }
        if !source.exists() {
            debug!("[supervisor] shared content {name} missing under {}", data_root.display());
            continue;
        }
        link_dir(&source, &target)?;
    }

    install_bridge(root, bridge_library)?;
    install_bootstrap(root, token, socket_path)?;
    write_engine_settings(root)?;

    Ok(WriteDir { root: root.to_path_buf(), script_path: root.join("script.txt") })
}

#[cfg(unix)]
fn link_dir(source: &Path, target: &Path) -> GmResult<()> {
    std::os::unix::fs::symlink(source, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn link_dir(source: &Path, target: &Path) -> GmResult<()> {
    warn!(
        "[supervisor] symlinks unsupported here; {} will not see {}",
        target.display(),
        source.display()
    );
    Ok(())
}

// ── Bridge artifacts ───────────────────────────────────────────────────

fn bridge_dir(root: &Path) -> PathBuf {
    root.join("AI")
        .join("Skirmish")
        .join(BRIDGE_AI_NAME)
        .join(BRIDGE_AI_VERSION)
}

fn install_bridge(root: &Path, bridge_library: Option<&Path>) -> GmResult<()> {
    let dir = bridge_dir(root);
    fs::create_dir_all(&dir)?;

    match bridge_library {
        Some(library) if library.exists() => {
            let file_name = library
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "libSkirmishBridge.so".into());
            fs::copy(library, dir.join(file_name))?;
        }
        Some(library) => {
            warn!("[supervisor] bridge library {} not found; engine will fail to load the AI", library.display());
        }
        None => {
            warn!("[supervisor] no bridge library configured; engine will fail to load the AI");
        }
    }

    fs::write(dir.join("AIInfo.lua"), ai_info_lua())?;
    fs::write(dir.join("AIOptions.lua"), ai_options_lua())?;
    Ok(())
}

fn ai_info_lua() -> String {
    format!(
        r#"local infos = {{
	{{ key='shortName', value='{BRIDGE_AI_NAME}', desc='machine conform name' }},
	{{ key='version', value='{BRIDGE_AI_VERSION}' }},
	{{ key='name', value='GameManager Skirmish Bridge' }},
	{{ key='description', value='Forwards engine events over local IPC and executes agent commands.' }},
	{{ key='interfaceShortName', value='C', desc='AI interface' }},
	{{ key='interfaceVersion', value='0.1' }},
}}
return infos
"#
    )
}

fn ai_options_lua() -> String {
    // No user-tunable options; the Bridge is configured via environment.
    "local options = {\n}\nreturn options\n".to_string()
}

// ── Bootstrap widget ───────────────────────────────────────────────────
// A single LuaUI widget that hands team control to the Bridge AI on game
// start. Its config file is keyed by player name so the widget can find its
// own slot.

fn install_bootstrap(root: &Path, token: &str, socket_path: &Path) -> GmResult<()> {
    let widgets = root.join("LuaUI").join("Widgets");
    let config = root.join("LuaUI").join("Config");
    fs::create_dir_all(&widgets)?;
    fs::create_dir_all(&config)?;

    fs::write(
        widgets.join(format!("{BOOTSTRAP_WIDGET}.lua")),
        bootstrap_widget_lua(),
    )?;

    let config_body = serde_json::json!({
        BRIDGE_PLAYER_NAME: {
            "token": token,
            "socket": socket_path.to_string_lossy(),
            "aiShortName": BRIDGE_AI_NAME,
        }
    });
    fs::write(
        config.join(format!("{BOOTSTRAP_WIDGET}.json")),
        serde_json::to_string_pretty(&config_body)?,
    )?;
    Ok(())
}

fn bootstrap_widget_lua() -> String {
    format!(
        r#"function widget:GetInfo()
	return {{
		name    = "GameManager Bootstrap",
		desc    = "Hands team control to the {BRIDGE_AI_NAME} AI on game start",
		author  = "GameManager",
		layer   = 0,
		enabled = true,
	}}
end

function widget:GameStart()
	local myTeam = Spring.GetMyTeamID()
	local _, leader, _, isAI = Spring.GetTeamInfo(myTeam)
	if not isAI then
		Spring.SendCommands("aicontrol " .. myTeam .. " {BRIDGE_AI_NAME}")
	end
	widgetHandler:RemoveWidget(self)
end
"#
    )
}

// ── Engine settings ────────────────────────────────────────────────────

fn write_engine_settings(root: &Path) -> GmResult<()> {
    // Headless-compatible: tiny window, no sound, no vsync.
    let settings = "\
XResolution = 800\n\
YResolution = 600\n\
Fullscreen = 0\n\
NoSound = 1\n\
VSync = 0\n\
";
    fs::write(root.join("springsettings.cfg"), settings)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn prepare_in(tmp: &TempDir, bridge: Option<&Path>) -> WriteDir {
        let root = tmp.path().join("instance");
        fs::create_dir_all(&root).unwrap();
        prepare(
            &root,
            &tmp.path().join("shared"),
            bridge,
            "token-1",
            Path::new("/tmp/gm-test.sock"),
        )
        .unwrap()
    }

    #[test]
    fn creates_output_dirs_and_artifacts() {
        let tmp = TempDir::new().unwrap();
        let wd = prepare_in(&tmp, None);
        assert!(wd.root.join("demos").is_dir());
        assert!(wd.root.join("temp").is_dir());
        assert!(bridge_dir(&wd.root).join("AIInfo.lua").is_file());
        assert!(bridge_dir(&wd.root).join("AIOptions.lua").is_file());
        assert!(wd.root.join("LuaUI/Widgets/gm_bootstrap.lua").is_file());
        assert!(wd.root.join("springsettings.cfg").is_file());
    }

    #[test]
    fn missing_shared_content_is_non_fatal() {
        let tmp = TempDir::new().unwrap();
        // No shared/ tree exists at all; preparation must still succeed.
        let wd = prepare_in(&tmp, None);
        assert!(!wd.root.join("maps").exists());
    }

    #[cfg(unix)]
    #[test]
    fn links_existing_shared_content() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("shared/maps")).unwrap();
        let wd = prepare_in(&tmp, None);
        assert!(wd.root.join("maps").is_symlink());
    }

    #[test]
    fn installs_bridge_library_when_present() {
        let tmp = TempDir::new().unwrap();
        let library = tmp.path().join("libSkirmishBridge.so");
        fs::write(&library, b"not really elf").unwrap();
        let wd = prepare_in(&tmp, Some(&library));
        assert!(bridge_dir(&wd.root).join("libSkirmishBridge.so").is_file());
    }

    #[test]
    fn bootstrap_config_is_keyed_by_player_name() {
        let tmp = TempDir::new().unwrap();
        let wd = prepare_in(&tmp, None);
        let config: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(wd.root.join("LuaUI/Config/gm_bootstrap.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(config[BRIDGE_PLAYER_NAME]["token"], "token-1");
    }

    #[test]
    fn engine_settings_disable_sound() {
        let tmp = TempDir::new().unwrap();
        let wd = prepare_in(&tmp, None);
        let settings = fs::read_to_string(wd.root.join("springsettings.cfg")).unwrap();
        assert!(settings.contains("NoSound = 1"));
        assert!(settings.contains("Fullscreen = 0"));
    }
}
