use super::*;
use rstest::rstest;

fn parsed(makeflags: &str) -> Config {
    Config::parse(makeflags).expect("parse MAKEFLAGS")
}

#[rstest]
#[case("")]
#[case("   \t ")]
#[case("-j4")]
#[case("kns --jobserver-auth=fifo:foo")]
#[case("n --jobserver-auth=10,42")]
#[case("--other-option --jobserver-fdsfoo=1,2")]
fn parse_without_jobserver(#[case] makeflags: &str) {
    assert_eq!(parsed(makeflags), Config::default());
}

#[rstest]
#[case("--jobserver-auth=fifo:foo")]
#[case("-one-flag --jobserver-auth=fifo:foo")]
#[case(" \t-j4 \t--jobserver-auth=fifo:foo")]
#[case("ks --jobserver-auth=fifo:foo")]
fn parse_fifo(#[case] makeflags: &str) {
    let config = parsed(makeflags);
    assert_eq!(config.mode, Mode::PosixFifo);
    assert_eq!(config.path, "foo");
}

#[rstest]
#[case("--jobserver-auth=10,42")]
#[case("--jobserver-fds=10,42")]
#[case("-j --jobserver-fds=10,42")]
fn parse_pipe(#[case] makeflags: &str) {
    let config = parsed(makeflags);
    assert_eq!(config.mode, Mode::Pipe);
    assert_eq!((config.read_fd, config.write_fd), (10, 42));
}

#[rstest]
#[case("--jobserver-auth=-1,42")]
#[case("--jobserver-auth=10,-42")]
fn negative_descriptors_disable_auth(#[case] makeflags: &str) {
    assert_eq!(parsed(makeflags).mode, Mode::None);
}

#[test]
fn negative_legacy_descriptors_still_select_pipe() {
    let config = parsed("--jobserver-fds=-1,4");
    assert_eq!(config.mode, Mode::Pipe);
    assert_eq!(config.read_fd, -1);
}

#[test]
fn other_auth_values_name_a_semaphore() {
    let config = parsed("--jobserver-auth=semaphore_name");
    assert_eq!(config.mode, Mode::Semaphore);
    assert_eq!(config.path, "semaphore_name");
}

#[test]
fn last_option_wins() {
    let config = parsed(
        "--jobserver-auth=10,42 --jobserver-fds=12,44 \
         --jobserver-auth=fifo:/tmp/fifo",
    );
    assert_eq!(config.mode, Mode::PosixFifo);
    assert_eq!(config.path, "/tmp/fifo");

    let config = parsed("--jobserver-auth=fifo:/tmp/fifo --jobserver-fds=12,44");
    assert_eq!(config.mode, Mode::Pipe);
    assert_eq!((config.read_fd, config.write_fd), (12, 44));
}

#[rstest]
#[case("--jobserver-fds=10,", "Invalid file descriptor pair [10,]")]
#[case("--jobserver-fds=foo", "Invalid file descriptor pair [foo]")]
fn malformed_legacy_pair_is_rejected(#[case] makeflags: &str, #[case] message: &str) {
    let err = Config::parse(makeflags).expect_err("bad pair");
    assert!(matches!(err, JobserverError::InvalidFdPair { .. }));
    assert_eq!(err.to_string(), message);
}

#[test]
fn mode_tables() {
    assert_eq!(Mode::valid_modes(" "), "none pipe fifo sem 0 1");
    assert_eq!(Mode::valid_modes(", "), "none, pipe, fifo, sem, 0, 1");
    if cfg!(windows) {
        assert_eq!(Mode::valid_native_modes(" "), "none sem 0 1");
    } else {
        assert_eq!(Mode::valid_native_modes(" "), "none pipe fifo 0 1");
        assert_eq!(Mode::valid_native_modes(", "), "none, pipe, fifo, 0, 1");
    }
}

#[rstest]
#[case("none", Mode::None)]
#[case("0", Mode::None)]
#[case("pipe", Mode::Pipe)]
#[case("fifo", Mode::PosixFifo)]
#[case("sem", Mode::Semaphore)]
#[case("1", Mode::DEFAULT)]
fn mode_names(#[case] name: &str, #[case] mode: Mode) {
    assert_eq!(name.parse::<Mode>().expect("known mode"), mode);
}

#[rstest]
#[case("")]
#[case("unknown")]
#[case("PIPE")]
fn unknown_mode_names(#[case] name: &str) {
    assert!(matches!(
        name.parse::<Mode>(),
        Err(JobserverError::UnknownMode { .. })
    ));
}

#[test]
fn mode_display_round_trips_canonical_names() {
    for mode in [Mode::None, Mode::Pipe, Mode::PosixFifo, Mode::Semaphore] {
        assert_eq!(mode.to_string().parse::<Mode>().expect("canonical"), mode);
    }
}

#[cfg(unix)]
#[test]
fn native_parse_rejects_semaphores() {
    let err = Config::parse_native("--jobserver-auth=semaphore_name").expect_err("posix");
    assert_eq!(err.to_string(), "Semaphore mode is only available on Windows!");
    assert!(Config::parse_native("--jobserver-auth=fifo:foo").is_ok());
}

#[test]
fn unset_makeflags_yields_default() {
    let config = Config::from_env_with(|_| None).expect("default");
    assert!(!config.has_mode());
}

#[test]
fn makeflags_are_read_through_the_injected_environment() {
    let config = Config::from_env_with(|key| {
        (key == "MAKEFLAGS").then(|| "-j8 --jobserver-auth=fifo:/run/jobs".into())
    })
    .expect("fifo");
    assert_eq!(config.mode, Mode::PosixFifo);
    assert_eq!(config.path, "/run/jobs");
}

#[test]
fn slot_accessors() {
    assert!(!Slot::Invalid.is_valid());
    assert!(Slot::Implicit.is_valid());
    assert!(Slot::Implicit.is_implicit());
    assert!(Slot::Explicit(b'+').is_explicit());
    assert_eq!(Slot::Explicit(b'+').explicit_value(), Some(b'+'));
    assert_eq!(Slot::Implicit.explicit_value(), None);
    assert_eq!(Slot::default(), Slot::Invalid);
}

#[test]
fn creating_a_client_without_a_mode_fails() {
    let err = create(&Config::default()).err().expect("no mode");
    assert!(matches!(
        err,
        JobserverError::UnsupportedMode { mode: Mode::None }
    ));
}

#[cfg(unix)]
mod posix_client {
    use std::os::fd::{AsRawFd, OwnedFd};

    use super::*;

    fn pipe_config(read: &OwnedFd, write: &OwnedFd) -> Config {
        Config {
            mode: Mode::Pipe,
            read_fd: read.as_raw_fd(),
            write_fd: write.as_raw_fd(),
            ..Config::default()
        }
    }

    #[test]
    fn implicit_slot_lifecycle() {
        let (read, write) = rustix::pipe::pipe().expect("pipe");
        let mut client = create(&pipe_config(&read, &write)).expect("client");

        let slot = client.try_acquire();
        assert_eq!(slot, Slot::Implicit);
        client.release(slot).expect("first release");
        assert_eq!(client.try_acquire(), Slot::Implicit);
        assert_eq!(client.try_acquire(), Slot::Invalid);

        client.release(Slot::Implicit).expect("release");
        assert!(matches!(
            client.release(Slot::Implicit),
            Err(JobserverError::ImplicitDoubleRelease)
        ));
    }

    #[test]
    fn explicit_slots_carry_the_token_byte() {
        let (read, write) = rustix::pipe::pipe().expect("pipe");
        let mut client = create(&pipe_config(&read, &write)).expect("client");
        assert_eq!(client.try_acquire(), Slot::Implicit);

        rustix::io::write(&write, b"x").expect("write token");
        let slot = client.try_acquire();
        assert_eq!(slot, Slot::Explicit(b'x'));
        assert_eq!(client.try_acquire(), Slot::Invalid);

        client.release(slot).expect("release");
        let mut buf = [0_u8; 1];
        assert_eq!(rustix::io::read(&read, buf.as_mut_slice()).expect("read"), 1);
        assert_eq!(buf, *b"x");
    }

    #[test]
    fn invalid_release_is_a_no_op() {
        let (read, write) = rustix::pipe::pipe().expect("pipe");
        let mut client = create(&pipe_config(&read, &write)).expect("client");
        client.release(Slot::Invalid).expect("no-op");
        assert_eq!(client.try_acquire(), Slot::Implicit);
    }

    #[test]
    fn regular_files_are_not_pipes() {
        let file = tempfile::tempfile().expect("tempfile");
        let fd = file.as_raw_fd();
        let config = Config {
            mode: Mode::Pipe,
            read_fd: fd,
            write_fd: fd,
            ..Config::default()
        };
        let err = create(&config).err().expect("rejected");
        assert_eq!(err.to_string(), "Invalid file descriptors");
    }

    #[rstest]
    #[case("", "Empty fifo path")]
    #[case("/nonexistent/cnobi-jobs", "Error opening fifo for reading")]
    fn bad_fifo_paths(#[case] path: &str, #[case] message: &str) {
        let config = Config {
            mode: Mode::PosixFifo,
            path: path.to_owned(),
            ..Config::default()
        };
        let err = create(&config).err().expect("rejected");
        assert!(err.to_string().starts_with(message), "{err}");
    }

    #[test]
    fn regular_file_is_not_a_fifo() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let path = file.path().to_string_lossy().into_owned();
        let config = Config {
            mode: Mode::PosixFifo,
            path: path.clone(),
            ..Config::default()
        };
        let err = create(&config).err().expect("rejected");
        assert_eq!(err.to_string(), format!("Not a fifo path: {path}"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn fifo_tokens_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = test_support::fifo::make_fifo(dir.path(), "jobs");
        let config = parsed(&format!("-j --jobserver-auth=fifo:{}", path.display()));
        let mut client = create(&config).expect("fifo client");

        assert_eq!(client.try_acquire(), Slot::Implicit);
        assert_eq!(client.try_acquire(), Slot::Invalid);
        client.release(Slot::Explicit(b'+')).expect("release");
        assert_eq!(client.try_acquire(), Slot::Explicit(b'+'));
    }
}
