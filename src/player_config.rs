//! The filetype-to-player table.
//!
//! The config file is pairs of lines: a regex, then the command that plays
//! whatever the regex matches. First matching pair wins. Commands are argv
//! vectors, never run through a shell.

use camino::Utf8Path;
use color_eyre::eyre::Context;
use color_eyre::{Result, Section};
use itertools::Itertools;
use regex::bytes::Regex;

/// One pattern/command pair from the config file.
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub pattern: Regex,
    pub argv: Vec<String>,
}

/// The ordered association list, resolved top to bottom.
#[derive(Debug, Clone, Default)]
pub struct PlayerConfig {
    entries: Vec<ConfigEntry>,
}

impl PlayerConfig {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        let mut pending: Option<Regex> = None;
        for (lineno, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            match pending.take() {
                None => {
                    let pattern = Regex::new(line)
                        .wrap_err("Bad pattern in player config")
                        .with_note(|| format!("line {}: {line}", lineno + 1))?;
                    pending = Some(pattern);
                }
                Some(pattern) => {
                    let argv = line.split_whitespace().map(str::to_owned).collect();
                    entries.push(ConfigEntry { pattern, argv });
                }
            }
        }
        // a trailing pattern with no command line is silently dropped
        Ok(PlayerConfig { entries })
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .wrap_err("Could not read player config")
            .with_note(|| format!("path: {path}"))?;
        Self::parse(&text)
    }

    /// Writes the default table on first run. Existing files are left alone.
    pub fn ensure_default(path: &Utf8Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        let body = format!("# {path}\n{DEFAULT_CONFIG}");
        std::fs::write(path, body)
            .wrap_err("Could not create default player config")
            .with_note(|| format!("path: {path}"))
    }

    pub fn entries(&self) -> &[ConfigEntry] {
        &self.entries
    }

    /// Human-readable listing, as returned by `showconfig`.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}\n\t{}\n", entry.pattern.as_str(), entry.argv.iter().join(" ")))
            .collect()
    }

    /// The program that would play `song`, if any pattern matches.
    pub fn program_for(&self, song: &[u8]) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.pattern.is_match(song))
            .and_then(|entry| entry.argv.first().map(String::as_str))
    }

    /// Resolves `song` to a full argv, or `None` when no pattern matches.
    ///
    /// Each template argument gets backreference expansion against the match
    /// and `$item` substituted with the song. When no argument changed, the
    /// song is appended so un-templated commands take it positionally.
    pub fn resolve(&self, song: &[u8]) -> Option<Vec<Vec<u8>>> {
        let (entry, captures) = self
            .entries
            .iter()
            .find_map(|entry| entry.pattern.captures(song).map(|c| (entry, c)))?;
        let mut argv = Vec::with_capacity(entry.argv.len() + 1);
        let mut changed = false;
        for arg in &entry.argv {
            let template = translate_replacement(arg.as_bytes());
            let mut expanded = Vec::new();
            captures.expand(&template, &mut expanded);
            let finished = replace_bytes(&expanded, b"$item", song);
            if finished != arg.as_bytes() {
                changed = true;
            }
            argv.push(finished);
        }
        if !changed {
            argv.push(song.to_vec());
        }
        Some(argv)
    }
}

/// Translates backslash-style replacement text (`\1`, `\\`, `\n`, `\t`) into
/// the `${n}` form the regex engine expands, escaping any literal `$` along
/// the way. Used both for config argv templates and for the `sub`/`sub_all`
/// replacement strings.
pub fn translate_replacement(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut bytes = input.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        match byte {
            b'$' => out.extend_from_slice(b"$$"),
            b'\\' => match bytes.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    out.extend_from_slice(b"${");
                    out.push(d);
                    bytes.next();
                    // group references take at most two digits
                    if let Some(d2) = bytes.peek().copied()
                        && d2.is_ascii_digit()
                    {
                        out.push(d2);
                        bytes.next();
                    }
                    out.push(b'}');
                }
                Some(b'\\') => {
                    out.push(b'\\');
                    bytes.next();
                }
                Some(b'n') => {
                    out.push(b'\n');
                    bytes.next();
                }
                Some(b't') => {
                    out.push(b'\t');
                    bytes.next();
                }
                Some(b'r') => {
                    out.push(b'\r');
                    bytes.next();
                }
                _ => out.push(b'\\'),
            },
            other => out.push(other),
        }
    }
    out
}

/// Literal byte-string find and replace, all occurrences.
fn replace_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while rest.len() >= needle.len() {
        match rest.windows(needle.len()).position(|w| w == needle) {
            Some(at) => {
                out.extend_from_slice(&rest[..at]);
                out.extend_from_slice(replacement);
                rest = &rest[at + needle.len()..];
            }
            None => break,
        }
    }
    out.extend_from_slice(rest);
    out
}

const DEFAULT_CONFIG: &str = r#"# This file associates filetypes with commands which play them.
#
# The format of this file is as follows:  Every pair of lines forms a unit.
# The first line in a pair is a regular expression that will be matched against
# items in the play list.  The second line in a pair is the command that will
# be used to play any items that match the regular expression.  The name of the
# item to be played will be appended to the end of this command line.
#
# The command will not be interpreted by a shell, so don't bother trying to use
# shell variables or globbing or I/O redirection, and be mindful of how you use
# quotes and parentheses.  If you need any of these fancy features, wrap up the
# command in a real shell script (and remember to use an "exec" statement to
# invoke the program that does the actual song playing, otherwise moosicd won't
# be able to do things like stop or pause the song).
#
# Blank lines and lines starting with a '#' character are ignored.  Regular
# expressions specified earlier in this file take precedence over those
# specified later.

(?i)\.mp3$
mpg123 -q

(?i)\.midi?$
timidity -idq

(?i)\.(mod|xm|s3m|stm|it|mtm|669|amf)$
mikmod -q

(?i)\.(wav|8svx|aiff|aifc|aif|au|cdr|maud|sf|snd|voc)$
sox $item -t ossdsp /dev/dsp

(?i)\.ogg$
ogg123 -q

(?i)\.m3u$
moosic -o pl-add

(?i)^cda://(\S+)
takcd \1
"#;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn args(argv: &[&str]) -> Vec<Vec<u8>> {
        argv.iter().map(|a| a.as_bytes().to_vec()).collect()
    }

    #[test]
    fn parses_pairs_and_skips_noise() {
        let config = PlayerConfig::parse(
            "# comment\n\n(?i)\\.mp3$\nmpg123 -q\n   \n(?i)\\.ogg$\nogg123 -q\n",
        )
        .unwrap();
        assert_eq!(config.entries().len(), 2);
        assert_eq!(config.entries()[0].argv, vec!["mpg123", "-q"]);
    }

    #[test]
    fn dangling_pattern_is_dropped() {
        let config = PlayerConfig::parse("(?i)\\.mp3$\nmpg123 -q\n(?i)\\.ogg$\n").unwrap();
        assert_eq!(config.entries().len(), 1);
    }

    #[test]
    fn bad_pattern_is_an_error() {
        assert!(PlayerConfig::parse("(unclosed\nplayer\n").is_err());
    }

    #[test]
    fn untemplated_command_takes_song_positionally() {
        let config = PlayerConfig::parse("(?i)\\.mp3$\nmpg123 -q\n").unwrap();
        assert_eq!(
            config.resolve(b"/x/Song.MP3").unwrap(),
            args(&["mpg123", "-q", "/x/Song.MP3"])
        );
    }

    #[test]
    fn backreferences_expand_from_the_match() {
        let config = PlayerConfig::parse("(?i)^cda://(\\S+)\ntakcd \\1\n").unwrap();
        assert_eq!(config.resolve(b"cda://5").unwrap(), args(&["takcd", "5"]));
    }

    #[test]
    fn item_token_is_substituted_in_place() {
        let config =
            PlayerConfig::parse("(?i)\\.wav$\nsox $item -t ossdsp /dev/dsp\n").unwrap();
        assert_eq!(
            config.resolve(b"/tmp/beep.wav").unwrap(),
            args(&["sox", "/tmp/beep.wav", "-t", "ossdsp", "/dev/dsp"])
        );
    }

    #[test]
    fn first_matching_pattern_wins() {
        let config =
            PlayerConfig::parse("\\.mp3$\nfirst\n\\.mp3$\nsecond\n").unwrap();
        assert_eq!(
            config.resolve(b"a.mp3").unwrap(),
            args(&["first", "a.mp3"])
        );
        assert_eq!(config.program_for(b"a.mp3"), Some("first"));
    }

    #[test]
    fn unmatched_song_resolves_to_nothing() {
        let config = PlayerConfig::parse("\\.mp3$\nmpg123\n").unwrap();
        assert!(config.resolve(b"/x/song.flac").is_none());
    }

    #[test]
    fn render_lists_pattern_then_command() {
        let config = PlayerConfig::parse("\\.mp3$\nmpg123 -q\n").unwrap();
        assert_eq!(config.render(), "\\.mp3$\n\tmpg123 -q\n");
    }

    #[test]
    fn default_config_parses() {
        let config = PlayerConfig::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.entries().len(), 7);
        assert_eq!(
            config.resolve(b"/x/Song.MP3").unwrap(),
            args(&["mpg123", "-q", "/x/Song.MP3"])
        );
    }

    #[test]
    fn replacement_translation_handles_escapes() {
        assert_eq!(translate_replacement(b"takcd \\1"), b"takcd ${1}".to_vec());
        assert_eq!(translate_replacement(b"a\\\\b"), b"a\\b".to_vec());
        assert_eq!(translate_replacement(b"a\\nb"), b"a\nb".to_vec());
        assert_eq!(translate_replacement(b"cost $5"), b"cost $$5".to_vec());
        assert_eq!(translate_replacement(b"\\12x"), b"${12}x".to_vec());
    }
}
