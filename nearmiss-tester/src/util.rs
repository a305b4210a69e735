use anyhow::{Context, Result, bail};
use nearmiss_core::Condition;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

/// Parse the `--seeds` list. Negative literals are folded to their magnitude.
pub fn parse_seeds(tokens: &[String]) -> Result<Vec<u64>> {
    let mut seeds = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Ok(value) = token.parse::<u64>() {
            seeds.push(value);
        } else if let Ok(value) = token.parse::<i64>() {
            seeds.push(value.unsigned_abs());
        } else {
            bail!("invalid seed `{token}`");
        }
    }
    if seeds.is_empty() {
        bail!("at least one seed is required");
    }
    Ok(seeds)
}

/// Parse `frame:loss`, e.g. `skill:near_miss`.
pub fn parse_forced_condition(value: &str) -> Result<Condition> {
    let (frame, loss) = value
        .split_once(':')
        .with_context(|| format!("expected frame:loss, got `{value}`"))?;
    Condition::from_pair(frame, loss)
        .with_context(|| format!("unknown condition `{value}`"))
}

pub enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    pub fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Stdout(w) => w.write(buf),
            Self::File(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearmiss_core::{FrameType, LossFrame};

    #[test]
    fn split_csv_drops_blanks() {
        assert_eq!(split_csv(" 1, ,2,"), vec!["1", "2"]);
    }

    #[test]
    fn seeds_accept_signed_literals() {
        let tokens = split_csv("7,-3");
        assert_eq!(parse_seeds(&tokens).unwrap(), vec![7, 3]);
        assert!(parse_seeds(&split_csv("seven")).is_err());
        assert!(parse_seeds(&[]).is_err());
    }

    #[test]
    fn forced_condition_needs_both_halves() {
        assert_eq!(
            parse_forced_condition("luck:near-miss").unwrap(),
            Condition::new(FrameType::Luck, LossFrame::NearMiss)
        );
        assert!(parse_forced_condition("luck").is_err());
        assert!(parse_forced_condition("luck:maybe").is_err());
    }
}
