use super::*;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};
use vmpm_core::VmpmError;
use vmpm_registry::{GitClient, GitCredentials, RepositoryFactory, SourceInfo, ZERO_COMMIT};
use vmpm_security::{compute_plugin_id, sha256_hex};

const COMMIT_A: &str = "1111111111111111111111111111111111111111";
const COMMIT_B: &str = "2222222222222222222222222222222222222222";
const VM_URL: &str = "https://downloads.example.test/spacesvm";

#[test]
fn state_store_starts_empty_when_file_is_missing() {
    let root = test_root();
    let store = StateStore::open(root.join("state.toml")).expect("must open");
    assert_eq!(store.state(), &StateFile::default());
    assert!(!store.path().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn state_store_commit_persists_sources_and_installs() {
    let root = test_root();
    let path = root.join("state.toml");
    let mut store = StateStore::open(&path).expect("must open");
    store.state_mut().sources.insert(
        "org/repo".to_string(),
        SourceInfo {
            url: "https://example.test/org/repo.git".to_string(),
            branch: "refs/heads/main".to_string(),
            commit: COMMIT_A.to_string(),
        },
    );
    store.state_mut().installed.insert(
        "org/repo:spacesvm".to_string(),
        InstallInfo {
            id: "sqja3uK17MJxfC7AN8nGadBw9JK5BcrsNwNynsqP5Gih8M5Bm".to_string(),
            commit: COMMIT_A.to_string(),
        },
    );
    store.commit().expect("must commit");

    let content = fs::read_to_string(&path).expect("must read state file");
    assert!(content.contains("[sources.\"org/repo\"]"));
    assert!(content.contains("[installed.\"org/repo:spacesvm\"]"));
    assert!(!root.join(".state.toml.part").exists());

    let reopened = StateStore::open(&path).expect("must reopen");
    assert_eq!(reopened.state(), store.state());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn state_store_rejects_unsupported_version() {
    let root = test_root();
    let path = root.join("state.toml");
    write_file(&path, "version = 7\n");

    let err = StateStore::open(&path).expect_err("must reject version");
    assert!(format!("{err:#}").contains("unsupported state file version 7"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn state_store_rejects_installs_from_untracked_sources() {
    let root = test_root();
    let path = root.join("state.toml");
    write_file(
        &path,
        "version = 1\n\n[installed.\"org/gone:vm\"]\nid = \"abc\"\ncommit = \"def\"\n",
    );

    let err = StateStore::open(&path).expect_err("must reject orphan install");
    assert!(format!("{err:#}").contains("untracked source 'org/gone'"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn engine_commits_partial_progress_when_workflow_fails() {
    let root = test_root();
    let path = root.join("state.toml");
    let mut engine = WorkflowEngine::new(StateStore::open(&path).expect("must open"));

    let err = engine
        .execute(&FailAfterMutation)
        .expect_err("workflow must fail");
    assert_eq!(err.to_string(), "failed after mutating");

    let reopened = StateStore::open(&path).expect("must reopen");
    assert_eq!(
        reopened.state().sources["org/partial"].commit,
        COMMIT_A,
        "partial mutation must be persisted"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn engine_commits_after_successful_workflow() {
    let root = test_root();
    let path = root.join("state.toml");
    let mut engine = WorkflowEngine::new(StateStore::open(&path).expect("must open"));

    engine
        .execute(&AddRepository::new(
            "org/repo",
            "https://example.test/org/repo.git",
            "main",
        ))
        .expect("must add repository");
    assert!(path.exists());

    let reopened = StateStore::open(&path).expect("must reopen");
    let source = &reopened.state().sources["org/repo"];
    assert_eq!(source.branch, "refs/heads/main");
    assert_eq!(source.commit, ZERO_COMMIT);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn add_repository_rejects_duplicates_and_invalid_aliases() {
    let mut state = StateFile::default();
    let add = AddRepository::new("org/repo", "https://example.test/org/repo.git", "main");
    add.execute(&mut state).expect("first add must succeed");

    let err = add.execute(&mut state).expect_err("second add must fail");
    assert!(matches!(
        VmpmError::kind_of(&err),
        Some(VmpmError::AlreadyExists(_))
    ));
    assert_eq!(state.sources.len(), 1);

    let err = AddRepository::new("no-slash", "https://example.test/x.git", "main")
        .execute(&mut state)
        .expect_err("invalid alias must fail");
    assert!(matches!(
        VmpmError::kind_of(&err),
        Some(VmpmError::InvalidAlias(_))
    ));
}

#[test]
fn remove_repository_guards_core_unknown_and_in_use_sources() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    let mut state = state_with_sources(&[("luxdefi/plugins-core", COMMIT_A), ("org/repo", COMMIT_A)]);
    state.installed.insert(
        "org/repo:spacesvm".to_string(),
        InstallInfo {
            id: "id".to_string(),
            commit: COMMIT_A.to_string(),
        },
    );

    let err = RemoveRepository::new("luxdefi/plugins-core", "luxdefi/plugins-core", &factory)
        .execute(&mut state)
        .expect_err("core source must be protected");
    assert!(matches!(
        VmpmError::kind_of(&err),
        Some(VmpmError::Protected(_))
    ));

    let err = RemoveRepository::new("org/unknown", "luxdefi/plugins-core", &factory)
        .execute(&mut state)
        .expect_err("unknown source must fail");
    assert!(matches!(
        VmpmError::kind_of(&err),
        Some(VmpmError::NotFound(_))
    ));

    let err = RemoveRepository::new("org/repo", "luxdefi/plugins-core", &factory)
        .execute(&mut state)
        .expect_err("source with installs must fail");
    match VmpmError::kind_of(&err) {
        Some(VmpmError::InUse { installed, .. }) => {
            assert_eq!(installed, &vec!["org/repo:spacesvm".to_string()]);
        }
        other => panic!("unexpected error kind: {other:?}"),
    }
    assert!(state.sources.contains_key("org/repo"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn remove_repository_drops_source_and_mirror() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    let mirror = factory.mirror_path("org/repo").expect("must map alias");
    write_file(&mirror.join("vms").join("spacesvm.yaml"), "alias: spacesvm\n");
    let mut state = state_with_sources(&[("luxdefi/plugins-core", COMMIT_A), ("org/repo", COMMIT_A)]);

    RemoveRepository::new("org/repo", "luxdefi/plugins-core", &factory)
        .execute(&mut state)
        .expect("must remove source");
    assert!(!state.sources.contains_key("org/repo"));
    assert!(!mirror.exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn update_advances_only_changed_watermarks() {
    let root = test_root();
    let git = ScriptedGit::default()
        .with_head("https://example.test/a/one.git", COMMIT_A)
        .with_head("https://example.test/b/two.git", COMMIT_B);
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    let mut state = state_with_sources(&[("a/one", COMMIT_A), ("b/two", ZERO_COMMIT)]);

    Update::new(&factory, &git, None)
        .execute(&mut state)
        .expect("update must succeed");
    assert_eq!(state.sources["a/one"].commit, COMMIT_A);
    assert_eq!(state.sources["b/two"].commit, COMMIT_B);
    assert_eq!(
        git.fetched.borrow().as_slice(),
        &[
            root.join("repositories").join("a").join("one"),
            root.join("repositories").join("b").join("two"),
        ]
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn update_aborts_on_first_failure_and_keeps_earlier_progress() {
    let root = test_root();
    let path = root.join("state.toml");
    let git = ScriptedGit::default()
        .with_head("https://example.test/a/one.git", COMMIT_B)
        .with_head("https://example.test/c/three.git", COMMIT_B);
    let factory = RepositoryFactory::new(root.join("repositories"), &git);

    let mut store = StateStore::open(&path).expect("must open");
    *store.state_mut() = state_with_sources(&[
        ("a/one", COMMIT_A),
        ("b/two", COMMIT_A),
        ("c/three", COMMIT_A),
    ]);
    let mut engine = WorkflowEngine::new(store);

    let err = engine
        .execute(&Update::new(&factory, &git, None))
        .expect_err("unreachable remote must fail update");
    assert!(format!("{err:#}").contains("failed to update repository b/two"));

    let reopened = StateStore::open(&path).expect("must reopen");
    assert_eq!(reopened.state().sources["a/one"].commit, COMMIT_B);
    assert_eq!(reopened.state().sources["b/two"].commit, COMMIT_A);
    assert_eq!(
        reopened.state().sources["c/three"].commit,
        COMMIT_A,
        "sources after the failure must not be synced"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_places_verified_binary_and_records_source_commit() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    write_vm_definition(&factory, "org/repo", "spacesvm", b"vm-binary");
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default().with(VM_URL, b"vm-binary");
    let installer = VmInstaller::new(&plugin_dir, &urls);
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);

    Install::new("org/repo:spacesvm", &factory, &installer)
        .execute(&mut state)
        .expect("install must succeed");

    let expected_id = compute_plugin_id("spacesvm").expect("must compute id");
    let info = &state.installed["org/repo:spacesvm"];
    assert_eq!(info.id, expected_id);
    assert_eq!(info.commit, COMMIT_A);
    let binary = plugin_dir.plugin_path(&expected_id).expect("valid plugin id");
    assert_eq!(fs::read(&binary).expect("must read binary"), b"vm-binary");
    assert!(is_executable_path(&binary));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_twice_is_a_no_op() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    write_vm_definition(&factory, "org/repo", "spacesvm", b"vm-binary");
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default().with(VM_URL, b"vm-binary");
    let installer = VmInstaller::new(&plugin_dir, &urls);
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);

    let install = Install::new("org/repo:spacesvm", &factory, &installer);
    install.execute(&mut state).expect("first install");
    let after_first = state.clone();
    install.execute(&mut state).expect("second install");

    assert_eq!(state, after_first);
    assert_eq!(state.installed.len(), 1);
    assert_eq!(urls.requests.borrow().len(), 1, "binary must be fetched once");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_with_checksum_mismatch_writes_nothing() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    write_vm_definition(&factory, "org/repo", "spacesvm", b"expected-binary");
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default().with(VM_URL, b"tampered-binary");
    let installer = VmInstaller::new(&plugin_dir, &urls);
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);

    let err = Install::new("org/repo:spacesvm", &factory, &installer)
        .execute(&mut state)
        .expect_err("mismatch must fail");
    match VmpmError::kind_of(&err) {
        Some(VmpmError::ChecksumMismatch { actual, .. }) => {
            assert_eq!(actual, &sha256_hex(b"tampered-binary"));
        }
        other => panic!("unexpected error kind: {other:?}"),
    }
    assert!(state.installed.is_empty());
    assert!(!plugin_dir.current_dir().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_prefers_declared_plugin_id() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    let mirror = factory.mirror_path("org/repo").expect("must map alias");
    write_file(
        &mirror.join("vms").join("spacesvm.yaml"),
        &format!(
            "id: sqja3uK17MJxfC7AN8nGadBw9JK5BcrsNwNynsqP5Gih8M5Bm\nalias: spacesvm\nurl: {VM_URL}\nsha256: {}\n",
            sha256_hex(b"vm-binary")
        ),
    );
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default().with(VM_URL, b"vm-binary");
    let installer = VmInstaller::new(&plugin_dir, &urls);
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);

    Install::new("org/repo:spacesvm", &factory, &installer)
        .execute(&mut state)
        .expect("install must succeed");
    assert_eq!(
        state.installed["org/repo:spacesvm"].id,
        "sqja3uK17MJxfC7AN8nGadBw9JK5BcrsNwNynsqP5Gih8M5Bm"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn uninstall_removes_binary_and_record() {
    let root = test_root();
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let binary = plugin_dir.plugin_path("plugin-id").expect("valid plugin id");
    write_file(&binary, "binary");
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);
    state.installed.insert(
        "org/repo:spacesvm".to_string(),
        InstallInfo {
            id: "plugin-id".to_string(),
            commit: COMMIT_A.to_string(),
        },
    );

    Uninstall::new("org/repo:spacesvm", &plugin_dir)
        .execute(&mut state)
        .expect("uninstall must succeed");
    assert!(state.installed.is_empty());
    assert!(!binary.exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn uninstall_of_missing_plugin_is_a_no_op() {
    let root = test_root();
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);
    let before = state.clone();

    Uninstall::new("org/repo:spacesvm", &plugin_dir)
        .execute(&mut state)
        .expect("uninstall must succeed");
    assert_eq!(state, before);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn install_rejects_declared_id_that_escapes_plugin_dir() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    let mirror = factory.mirror_path("org/repo").expect("must map alias");
    let absolute = root.join("absolute-escape");
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default().with(VM_URL, b"vm-binary");
    let installer = VmInstaller::new(&plugin_dir, &urls);

    for (plugin, id) in [
        ("relative", "../../escaped".to_string()),
        ("absolute", absolute.display().to_string()),
        ("parent", "..".to_string()),
    ] {
        write_file(
            &mirror.join("vms").join(format!("{plugin}.yaml")),
            &format!(
                "id: '{id}'\nalias: {plugin}\nurl: {VM_URL}\nsha256: {}\n",
                sha256_hex(b"vm-binary")
            ),
        );
        let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);

        let err = Install::new(format!("org/repo:{plugin}"), &factory, &installer)
            .execute(&mut state)
            .expect_err("id outside current/ must be rejected");
        assert!(
            matches!(VmpmError::kind_of(&err), Some(VmpmError::InvalidName { .. })),
            "id {id:?}"
        );
        assert!(state.installed.is_empty());
    }

    assert!(urls.requests.borrow().is_empty(), "nothing may be downloaded");
    assert!(!root.join("escaped").exists());
    assert!(!absolute.exists());
    assert!(!plugin_dir.current_dir().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn plugin_dir_only_maps_single_file_names() {
    let plugin_dir = PluginDir::new("/var/lib/node/plugins");
    assert_eq!(
        plugin_dir.plugin_path("plugin-id").expect("valid plugin id"),
        Path::new("/var/lib/node/plugins/current/plugin-id")
    );

    for invalid in ["", ".", "..", "../x", "a/b", "a\\b", "/etc/passwd", "./x"] {
        let err = plugin_dir
            .plugin_path(invalid)
            .expect_err("must reject non file name");
        assert!(
            matches!(VmpmError::kind_of(&err), Some(VmpmError::InvalidName { .. })),
            "id {invalid:?}"
        );
    }
}

#[test]
fn uninstall_refuses_recorded_id_outside_plugin_dir() {
    let root = test_root();
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let victim = root.join("plugins").join("victim");
    write_file(&victim, "not a plugin");
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);
    state.installed.insert(
        "org/repo:spacesvm".to_string(),
        InstallInfo {
            id: "../victim".to_string(),
            commit: COMMIT_A.to_string(),
        },
    );

    let err = Uninstall::new("org/repo:spacesvm", &plugin_dir)
        .execute(&mut state)
        .expect_err("recorded id outside current/ must be rejected");
    assert!(matches!(
        VmpmError::kind_of(&err),
        Some(VmpmError::InvalidName { .. })
    ));
    assert!(victim.exists());
    assert!(state.installed.contains_key("org/repo:spacesvm"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn uninstall_keeps_binary_shared_with_another_install() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    write_vm_definition(&factory, "a/one", "spacesvm", b"vm-binary");
    write_vm_definition(&factory, "b/two", "spacesvm", b"vm-binary");
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default().with(VM_URL, b"vm-binary");
    let installer = VmInstaller::new(&plugin_dir, &urls);
    let mut state = state_with_sources(&[("a/one", COMMIT_A), ("b/two", COMMIT_A)]);

    for name in ["a/one:spacesvm", "b/two:spacesvm"] {
        Install::new(name, &factory, &installer)
            .execute(&mut state)
            .expect("install must succeed");
    }
    let plugin_id = compute_plugin_id("spacesvm").expect("must compute id");
    let binary = plugin_dir.plugin_path(&plugin_id).expect("valid plugin id");
    assert_eq!(state.installed["a/one:spacesvm"].id, plugin_id);
    assert_eq!(state.installed["b/two:spacesvm"].id, plugin_id);

    Uninstall::new("a/one:spacesvm", &plugin_dir)
        .execute(&mut state)
        .expect("uninstall must succeed");
    assert!(!state.installed.contains_key("a/one:spacesvm"));
    assert!(state.installed.contains_key("b/two:spacesvm"));
    assert!(binary.exists(), "binary still used by b/two must stay");

    Uninstall::new("b/two:spacesvm", &plugin_dir)
        .execute(&mut state)
        .expect("uninstall must succeed");
    assert!(state.installed.is_empty());
    assert!(!binary.exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn upgrade_vm_reinstalls_only_when_watermark_moved() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    write_vm_definition(&factory, "org/repo", "spacesvm", b"vm-binary-v2");
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default().with(VM_URL, b"vm-binary-v2");
    let installer = VmInstaller::new(&plugin_dir, &urls);
    let plugin_id = compute_plugin_id("spacesvm").expect("must compute id");
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);
    state.installed.insert(
        "org/repo:spacesvm".to_string(),
        InstallInfo {
            id: plugin_id.clone(),
            commit: COMMIT_A.to_string(),
        },
    );

    let upgrade = UpgradeVm::new("org/repo:spacesvm", &factory, &installer, &plugin_dir);
    upgrade.execute(&mut state).expect("current plugin upgrade");
    assert!(urls.requests.borrow().is_empty(), "no download when current");
    assert!(!is_outdated(&state, "org/repo:spacesvm"));

    state
        .sources
        .get_mut("org/repo")
        .expect("source must exist")
        .commit = COMMIT_B.to_string();
    assert!(is_outdated(&state, "org/repo:spacesvm"));
    upgrade.execute(&mut state).expect("stale plugin upgrade");
    assert_eq!(state.installed["org/repo:spacesvm"].commit, COMMIT_B);
    assert_eq!(
        fs::read(plugin_dir.plugin_path(&plugin_id).expect("valid plugin id"))
            .expect("must read binary"),
        b"vm-binary-v2"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn upgrade_vm_of_missing_plugin_is_not_found() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default();
    let installer = VmInstaller::new(&plugin_dir, &urls);
    let mut state = state_with_sources(&[("org/repo", COMMIT_A)]);

    let err = UpgradeVm::new("org/repo:spacesvm", &factory, &installer, &plugin_dir)
        .execute(&mut state)
        .expect_err("must fail");
    assert!(matches!(
        VmpmError::kind_of(&err),
        Some(VmpmError::NotFound(_))
    ));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn upgrade_all_walks_every_installed_plugin() {
    let root = test_root();
    let git = ScriptedGit::default();
    let factory = RepositoryFactory::new(root.join("repositories"), &git);
    write_vm_definition(&factory, "org/repo", "spacesvm", b"vm-binary");
    write_vm_definition(&factory, "org/repo", "timestampvm", b"vm-binary");
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let urls = FakeUrls::default().with(VM_URL, b"vm-binary");
    let installer = VmInstaller::new(&plugin_dir, &urls);
    let old_binary = plugin_dir.plugin_path("old-id").expect("valid plugin id");
    write_file(&old_binary, "old");
    let mut state = state_with_sources(&[("org/repo", COMMIT_B)]);
    for name in ["org/repo:spacesvm", "org/repo:timestampvm"] {
        state.installed.insert(
            name.to_string(),
            InstallInfo {
                id: "old-id".to_string(),
                commit: COMMIT_A.to_string(),
            },
        );
    }

    Upgrade::new(&factory, &installer, &plugin_dir)
        .execute(&mut state)
        .expect("upgrade must succeed");
    assert!(state
        .installed
        .values()
        .all(|info| info.commit == COMMIT_B && info.id != "old-id"));
    assert!(!old_binary.exists(), "old binary goes once no install uses it");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn state_lock_reports_busy_while_held() {
    let root = test_root();
    let lock_path = root.join("vmpm.lock");

    let outcome = with_state_lock(&lock_path, || {
        let err = with_state_lock(&lock_path, || Ok(()))
            .expect_err("second lock must fail fast");
        assert!(matches!(
            VmpmError::kind_of(&err),
            Some(VmpmError::Busy(_))
        ));
        Ok("held")
    })
    .expect("first lock must succeed");
    assert_eq!(outcome, "held");

    with_state_lock(&lock_path, || Ok(())).expect("lock must be released");

    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn link_symlinks_binary_under_canonical_plugin_id() {
    let root = test_root();
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let binary = root.join("build").join("evm");
    write_file(&binary, "#!/bin/sh\n");
    fs_utils::make_executable(&binary).expect("must mark executable");
    let stale = plugin_dir
        .plugin_path(&compute_plugin_id("Lux EVM").expect("must compute id"))
        .expect("valid plugin id");
    write_file(&stale, "old");

    let report = Link::new("luxfi", "evm", DEFAULT_LINK_VERSION, &binary, &plugin_dir)
        .link()
        .expect("link must succeed");
    assert_eq!(report.vm_name, "Lux EVM");
    assert_eq!(report.package, "luxfi/evm@v0.0.0-local");
    assert_eq!(report.symlink, stale);
    assert_eq!(
        fs::read_link(&report.symlink).expect("must be a symlink"),
        binary
    );

    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn link_rejects_missing_directory_and_non_executable_paths() {
    let root = test_root();
    let plugin_dir = PluginDir::new(root.join("plugins"));

    let err = Link::new("org", "vm", DEFAULT_LINK_VERSION, root.join("missing"), &plugin_dir)
        .link()
        .expect_err("missing binary must fail");
    assert!(matches!(
        VmpmError::kind_of(&err),
        Some(VmpmError::NotFound(_))
    ));

    fs::create_dir_all(root.join("dir")).expect("must create dir");
    let err = Link::new("org", "vm", DEFAULT_LINK_VERSION, root.join("dir"), &plugin_dir)
        .link()
        .expect_err("directory must fail");
    assert!(err.to_string().contains("is a directory"));

    let plain = root.join("plain");
    write_file(&plain, "data");
    let err = Link::new("org", "vm", DEFAULT_LINK_VERSION, &plain, &plugin_dir)
        .link()
        .expect_err("non-executable must fail");
    assert!(err.to_string().contains("not executable"));
    assert!(!plugin_dir.current_dir().exists());

    let _ = fs::remove_dir_all(&root);
}

#[cfg(unix)]
#[test]
fn link_rejects_paths_that_are_not_regular_files() {
    let root = test_root();
    fs::create_dir_all(&root).expect("must create root");
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let fifo = root.join("fifo");
    let status = std::process::Command::new("mkfifo")
        .arg(&fifo)
        .status()
        .expect("mkfifo must run");
    assert!(status.success());

    let err = Link::new("org", "vm", DEFAULT_LINK_VERSION, &fifo, &plugin_dir)
        .link()
        .expect_err("fifo must fail");
    assert!(err.to_string().contains("not a regular file"));
    assert!(!plugin_dir.current_dir().exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn link_rejects_names_longer_than_plugin_id() {
    let root = test_root();
    let plugin_dir = PluginDir::new(root.join("plugins"));
    let binary = root.join("vm");
    write_file(&binary, "#!/bin/sh\n");
    fs_utils::make_executable(&binary).expect("must mark executable");

    let err = Link::new(
        "org",
        "a-virtual-machine-name-well-past-32-bytes",
        DEFAULT_LINK_VERSION,
        &binary,
        &plugin_dir,
    )
    .link()
    .expect_err("long name must fail");
    assert!(matches!(
        VmpmError::kind_of(&err),
        Some(VmpmError::InvalidName { .. })
    ));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn canonical_vm_name_only_renames_lux_evm() {
    assert_eq!(canonical_vm_name("luxfi", "evm"), "Lux EVM");
    assert_eq!(canonical_vm_name("other", "evm"), "evm");
    assert_eq!(canonical_vm_name("luxfi", "spacesvm"), "spacesvm");
}

struct FailAfterMutation;

impl Workflow for FailAfterMutation {
    fn name(&self) -> &'static str {
        "fail-after-mutation"
    }

    fn execute(&self, state: &mut StateFile) -> Result<()> {
        state.sources.insert(
            "org/partial".to_string(),
            SourceInfo {
                url: "https://example.test/org/partial.git".to_string(),
                branch: "refs/heads/main".to_string(),
                commit: COMMIT_A.to_string(),
            },
        );
        Err(anyhow!("failed after mutating"))
    }
}

#[derive(Default)]
struct ScriptedGit {
    heads: BTreeMap<String, String>,
    fetched: RefCell<Vec<PathBuf>>,
}

impl ScriptedGit {
    fn with_head(mut self, url: &str, commit: &str) -> Self {
        self.heads.insert(url.to_string(), commit.to_string());
        self
    }
}

impl GitClient for ScriptedGit {
    fn head(
        &self,
        remote_url: &str,
        local_path: &Path,
        _branch_ref: &str,
        _auth: Option<&GitCredentials>,
    ) -> Result<String> {
        self.fetched.borrow_mut().push(local_path.to_path_buf());
        self.heads
            .get(remote_url)
            .cloned()
            .ok_or_else(|| anyhow!("source-sync-failed: remote {remote_url} unreachable"))
    }

    fn last_modified(&self, _repo_path: &Path, _relative_path: &Path) -> Result<String> {
        Ok(COMMIT_A.to_string())
    }
}

#[derive(Default)]
struct FakeUrls {
    bodies: BTreeMap<String, Vec<u8>>,
    requests: RefCell<Vec<String>>,
}

impl FakeUrls {
    fn with(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }
}

impl UrlClient for FakeUrls {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.borrow_mut().push(url.to_string());
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| VmpmError::Unreachable(url.to_string()).into())
    }
}

fn state_with_sources(sources: &[(&str, &str)]) -> StateFile {
    let mut state = StateFile::default();
    for (alias, commit) in sources {
        state.sources.insert(
            (*alias).to_string(),
            SourceInfo {
                url: format!("https://example.test/{alias}.git"),
                branch: "refs/heads/main".to_string(),
                commit: (*commit).to_string(),
            },
        );
    }
    state
}

fn write_vm_definition(factory: &RepositoryFactory<'_>, alias: &str, name: &str, binary: &[u8]) {
    let mirror = factory.mirror_path(alias).expect("must map alias");
    write_file(
        &mirror.join("vms").join(format!("{name}.yaml")),
        &format!(
            "alias: {name}\nhomepage: https://example.test\nurl: {VM_URL}\nsha256: {}\n",
            sha256_hex(binary)
        ),
    );
}

fn is_executable_path(path: &Path) -> bool {
    fs::metadata(path)
        .map(|metadata| fs_utils::is_executable(&metadata))
        .unwrap_or(false)
}

fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent dir");
    }
    fs::write(path, content).expect("must write file");
}

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    path.push(format!(
        "vmpm-installer-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ));
    path
}
