//! Integration tests for gitmirror

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Temp cache root plus a config file pointing at it
    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = format!(
                "[mirrors]\ncache_dir = \"{}\"\nexpiration_hours = 24\n",
                dir.path().join("mirrors").display()
            );
            fs::write(dir.path().join("config.toml"), config).unwrap();
            Self { dir }
        }

        fn cmd(&self) -> Command {
            let mut cmd = cargo_bin_cmd!("gitmirror");
            cmd.env("GITMIRROR_CONFIG", self.dir.path().join("config.toml"));
            cmd
        }

        fn mirrors(&self) -> PathBuf {
            self.dir.path().join("mirrors")
        }

        fn resolve(&self, url: &str) -> PathBuf {
            let output = self.cmd().args(["resolve", url]).output().unwrap();
            assert!(output.status.success());
            PathBuf::from(String::from_utf8(output.stdout).unwrap().trim())
        }
    }

    fn gitmirror() -> Command {
        cargo_bin_cmd!("gitmirror")
    }

    #[test]
    fn help_displays() {
        gitmirror()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("bare git mirrors"));
    }

    #[test]
    fn version_displays() {
        gitmirror()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("gitmirror"));
    }

    #[test]
    fn resolve_is_stable_across_invocations() {
        let fx = Fixture::new();
        let first = fx.resolve("git://some.org/repository.git");
        let second = fx.resolve("git://some.org/repository.git");

        assert_eq!(first, second);
        assert_eq!(first.parent().unwrap(), fx.mirrors());
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("git-") && name.ends_with(".git"));
        assert!(first.join("timestamp").is_file());
        let map = fs::read_to_string(fx.mirrors().join("map")).unwrap();
        assert_eq!(map, format!("git://some.org/repository.git = {name}\n"));
    }

    #[test]
    fn list_shows_mappings() {
        let fx = Fixture::new();
        fx.cmd()
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("No mirrors"));

        fx.resolve("git://some.org/a.git");
        fx.cmd()
            .args(["list", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"url\": \"git://some.org/a.git\""));
        fx.cmd()
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::starts_with("git://some.org/a.git = "));
    }

    #[test]
    fn invalidate_gives_url_a_new_dir() {
        let fx = Fixture::new();
        let url = "git://some.org/repository.git";
        let first = fx.resolve(url);

        fx.cmd()
            .args(["invalidate", first.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("invalidated mirror of"));

        assert!(!first.exists());
        let invalid = fs::read_to_string(fx.mirrors().join("invalid")).unwrap();
        assert!(invalid.contains(first.file_name().unwrap().to_str().unwrap()));
        assert_ne!(fx.resolve(url), first);
    }

    #[test]
    fn invalidate_outside_root_fails_with_hint() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["invalidate", fx.dir.path().join("elsewhere").to_str().unwrap()])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Not a mirror directory"))
            .stderr(predicate::str::contains("gitmirror list"));
    }

    #[test]
    fn evict_skips_kept_urls() {
        let fx = Fixture::new();
        let kept = fx.resolve("git://some.org/r1");
        let dropped = fx.resolve("git://some.org/r2");

        fx.cmd()
            .args(["evict", "--keep", "git://some.org/r1", "--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains(dropped.to_str().unwrap()))
            .stdout(predicate::str::contains(kept.to_str().unwrap()).not());
    }

    #[test]
    fn cleanup_dry_run_keeps_expired_mirrors() {
        let fx = Fixture::new();
        let old = fx.resolve("git://some.org/old.git");
        fs::write(old.join("timestamp"), "1000").unwrap();

        fx.cmd()
            .args(["cleanup", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Dry run"));
        assert!(old.exists());

        fx.cmd().arg("cleanup").assert().success();
        assert!(!old.exists());
    }

    #[test]
    fn cache_list_and_reset() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["cache", "list"])
            .assert()
            .success()
            .stdout("git\n");
        fx.cmd()
            .args(["cache", "status", "git"])
            .assert()
            .success()
            .stdout(predicate::str::contains("empty"));

        let a = fx.resolve("git://some.org/a.git");
        let b = fx.resolve("git://some.org/b.git");
        fx.cmd()
            .args(["cache", "reset", "git", "--yes"])
            .assert()
            .success()
            .stdout(predicate::str::contains("removed 2 mirror(s)"));

        assert!(!a.exists() && !b.exists());
        assert_eq!(fs::read_to_string(fx.mirrors().join("map")).unwrap(), "");
    }

    #[test]
    fn reset_without_confirmation_aborts() {
        let fx = Fixture::new();
        let a = fx.resolve("git://some.org/a.git");
        fx.cmd()
            .args(["cache", "reset", "git"])
            .write_stdin("n\n")
            .assert()
            .success()
            .stdout(predicate::str::contains("Aborted"));
        assert!(a.exists());
    }

    #[test]
    fn unknown_cache_is_rejected() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["cache", "status", "maven"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown cache"));
    }

    fn state(fx: &Fixture, repo: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
        fx.cmd()
            .arg("state")
            .arg(args[0])
            .arg(repo)
            .args(&args[1..])
            .assert()
    }

    #[test]
    fn state_set_get_unset() {
        let fx = Fixture::new();
        let repo = fx.dir.path().join("repo");

        state(&fx, &repo, &["set", "fetch", "xmx", "512"]).success();
        state(&fx, &repo, &["set", "patch", "xmx", "1024"]).success();
        state(&fx, &repo, &["get", "fetch", "xmx"]).success().stdout("512\n");
        state(&fx, &repo, &["memory", "patch"]).success().stdout("1024M\n");

        state(&fx, &repo, &["unset", "fetch", "xmx"]).success();
        state(&fx, &repo, &["get", "fetch", "xmx"])
            .success()
            .stdout(predicate::str::contains("unset"));
        assert_eq!(
            fs::read_to_string(repo.join("gitmirror-state")).unwrap(),
            "patch.xmx=1024\n"
        );
    }

    #[test]
    fn state_rejects_keys_that_corrupt_the_file() {
        let fx = Fixture::new();
        let repo = fx.dir.path().join("repo");

        state(&fx, &repo, &["set", "fetch", "a=b", "1"])
            .failure()
            .stderr(predicate::str::contains("Invalid state key"));
        state(&fx, &repo, &["get", "fetch.a", "b"])
            .failure()
            .stderr(predicate::str::contains("Invalid state namespace"));
        assert!(!repo.join("gitmirror-state").exists());
    }

    #[test]
    fn config_path_honours_env() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let fx = Fixture::new();
        fx.cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[mirrors]"))
            .stdout(predicate::str::contains("expiration_hours = 24"));
    }

    #[test]
    fn invalid_config_reports_hint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[mirrors\n").unwrap();

        gitmirror()
            .env("GITMIRROR_CONFIG", &path)
            .args(["list"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn config_init_repairs_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[mirrors\n").unwrap();

        gitmirror()
            .env("GITMIRROR_CONFIG", &path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
        gitmirror()
            .env("GITMIRROR_CONFIG", &path)
            .args(["config", "init", "--force"])
            .assert()
            .success();
        assert!(fs::read_to_string(&path).unwrap().contains("[mirrors]"));
    }

    #[test]
    fn unknown_command_fails() {
        gitmirror().arg("frobnicate").assert().failure();
    }
}
