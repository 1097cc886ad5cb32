use std::{
    io::{self, Read},
    path::Path,
    process::{Command, Output, Stdio},
};
use xshell::Shell;

/// Extract an RPM, by piping the output of `rpm2cpio` into `cpio`.
pub fn extract_rpm(archive: &Path, dest: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dest)?;

    let mut rpm2cpio = Command::new("rpm2cpio");
    rpm2cpio.arg(archive);

    let mut cpio = Command::new("cpio");
    cpio.args(["-idm", "--quiet", "--no-absolute-filenames"])
        .current_dir(dest);

    let (converted, cpio) = pipe(rpm2cpio, cpio)?;

    check("rpm2cpio", &converted)?;
    check("cpio", &cpio)
}

/// Run `producer`, with its output fed into `consumer`.
///
/// The standard error of the producer is drained on its own thread, so that it can't block the
/// pipe.
fn pipe(mut producer: Command, mut consumer: Command) -> io::Result<(Output, Output)> {
    let mut producer = producer
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (Some(stdout), Some(mut stderr)) = (producer.stdout.take(), producer.stderr.take()) else {
        return Err(io::Error::other("missing output pipes"));
    };

    let drain = std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stderr.read_to_end(&mut buf);
        buf
    });

    let consumed = consumer
        .stdin(stdout)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    // reap the producer in any case
    let status = producer.wait()?;
    let stderr = drain.join().unwrap_or_default();

    Ok((
        Output {
            status,
            stdout: vec![],
            stderr,
        },
        consumed?,
    ))
}

fn check(program: &str, output: &Output) -> io::Result<()> {
    if output.status.success() {
        return Ok(());
    }

    Err(io::Error::new(
        io::ErrorKind::InvalidData,
        format!(
            "{program} failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ),
    ))
}

/// Render the fallback command for an archive.
///
/// The template is split on whitespace, `{archive}` and `{dest}` get replaced in each argument.
pub fn render(template: &str, archive: &Path, dest: &Path) -> Option<(String, Vec<String>)> {
    let archive = archive.to_string_lossy();
    let dest = dest.to_string_lossy();

    let mut parts = template.split_whitespace().map(|part| {
        part.replace("{archive}", &archive)
            .replace("{dest}", &dest)
    });

    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Extract an archive using the fallback command.
pub fn extract_fallback(template: &str, archive: &Path, dest: &Path) -> io::Result<()> {
    let (program, args) = render(template, archive, dest).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "empty fallback command")
    })?;

    std::fs::create_dir_all(dest)?;

    let sh = Shell::new().map_err(io::Error::other)?;
    sh.cmd(program)
        .args(args)
        .quiet()
        .ignore_stdout()
        .ignore_stderr()
        .run()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn render_template() {
        assert_eq!(
            render(
                "7z x -y -o{dest} {archive}",
                Path::new("/tmp/a b.7z"),
                Path::new("/tmp/out")
            ),
            Some((
                "7z".to_string(),
                vec![
                    "x".to_string(),
                    "-y".to_string(),
                    "-o/tmp/out".to_string(),
                    "/tmp/a b.7z".to_string()
                ]
            ))
        );
        assert_eq!(render("  ", Path::new("a"), Path::new("b")), None);
    }

    #[test]
    fn noisy_producer() -> anyhow::Result<()> {
        // more than a pipe buffer of diagnostics, before any output
        let mut producer = Command::new("sh");
        producer.args(["-c", "head -c 1048576 /dev/zero >&2; echo payload"]);

        let (produced, consumed) = pipe(producer, Command::new("cat"))?;

        check("sh", &produced)?;
        check("cat", &consumed)?;
        assert_eq!(produced.stderr.len(), 1048576);
        assert_eq!(consumed.stdout, b"payload\n");

        Ok(())
    }

    #[test]
    fn failing_producer() -> anyhow::Result<()> {
        let mut producer = Command::new("sh");
        producer.args(["-c", "echo broken >&2; exit 3"]);

        let (produced, _) = pipe(producer, Command::new("cat"))?;

        let err = check("rpm2cpio", &produced).expect_err("must fail");
        assert!(err.to_string().contains("broken"), "{err}");

        Ok(())
    }

    #[test]
    fn missing_fallback_tool() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("a.7z");
        std::fs::write(&archive, b"garbage")?;

        assert!(extract_fallback(
            "openlcs-no-such-extractor {archive} {dest}",
            &archive,
            &dir.path().join("out")
        )
        .is_err());

        Ok(())
    }
}
