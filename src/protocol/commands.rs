//! Module `commands`
//!
//! Defines the FTP command enum and the parser that turns one trimmed
//! command line into it. Verbs are case-insensitive; the legacy `X`
//! variants (XPWD, XCWD, ...) fold onto their modern forms.

/// Represents an FTP command parsed from one client input line.
///
/// Commands carrying an argument store it verbatim (possibly empty, e.g.
/// `PASS` with an empty password); argument validation belongs to the
/// handlers.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Command {
    Abor,
    Allo,
    Appe(String),
    Cdup,
    Cwd(String),
    Dele(String),
    Feat,
    Help,
    List(String),
    Mdtm(String),
    Mkd(String),
    Mode(String),
    Nlst(String),
    Noop,
    Pass(String),
    Pasv,
    Port(String),
    Pwd,
    Quit,
    Rest(String),
    Retr(String),
    Rmd(String),
    Rnfr(String),
    Rnto(String),
    Size(String),
    Stat(String),
    Stor(String),
    Stou,
    Stru(String),
    Syst,
    Type(String),
    User(String),
    Unknown(String),
}

/// Parses a raw command line received from a client into the `Command`
/// enum. The verb is matched case-insensitively; everything after the
/// first whitespace run is the argument.
pub fn parse_command(raw: &str) -> Command {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("").to_ascii_uppercase();
    let arg = parts.next().unwrap_or("").trim().to_string();

    match verb.as_str() {
        "ABOR" => Command::Abor,
        "ALLO" => Command::Allo,
        "APPE" => Command::Appe(arg),
        "CDUP" | "XCUP" => Command::Cdup,
        "CWD" | "XCWD" => Command::Cwd(arg),
        "DELE" => Command::Dele(arg),
        "FEAT" => Command::Feat,
        "HELP" => Command::Help,
        "LIST" => Command::List(arg),
        "MDTM" => Command::Mdtm(arg),
        "MKD" | "XMKD" => Command::Mkd(arg),
        "MODE" => Command::Mode(arg),
        "NLST" => Command::Nlst(arg),
        "NOOP" => Command::Noop,
        "PASS" => Command::Pass(arg),
        "PASV" => Command::Pasv,
        "PORT" => Command::Port(arg),
        "PWD" | "XPWD" => Command::Pwd,
        "QUIT" => Command::Quit,
        "REST" => Command::Rest(arg),
        "RETR" => Command::Retr(arg),
        "RMD" | "XRMD" => Command::Rmd(arg),
        "RNFR" => Command::Rnfr(arg),
        "RNTO" => Command::Rnto(arg),
        "SIZE" => Command::Size(arg),
        "STAT" => Command::Stat(arg),
        "STOR" => Command::Stor(arg),
        "STOU" => Command::Stou,
        "STRU" => Command::Stru(arg),
        "SYST" => Command::Syst,
        "TYPE" => Command::Type(arg),
        "USER" => Command::User(arg),
        _ => Command::Unknown(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_commands() {
        assert_eq!(parse_command("QUIT"), Command::Quit);
        assert_eq!(parse_command("PASV"), Command::Pasv);
        assert_eq!(parse_command("PWD"), Command::Pwd);
        assert_eq!(parse_command("NOOP"), Command::Noop);
        assert_eq!(parse_command("SYST"), Command::Syst);
    }

    #[test]
    fn test_parse_commands_with_args() {
        assert_eq!(
            parse_command("CWD /some/path"),
            Command::Cwd("/some/path".to_string())
        );
        assert_eq!(
            parse_command("USER anonymous"),
            Command::User("anonymous".to_string())
        );
        assert_eq!(
            parse_command("RETR file.txt"),
            Command::Retr("file.txt".to_string())
        );
        assert_eq!(
            parse_command("PORT 127,0,0,1,8,74"),
            Command::Port("127,0,0,1,8,74".to_string())
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(parse_command("quit"), Command::Quit);
        assert_eq!(
            parse_command("retr File.TXT"),
            Command::Retr("File.TXT".to_string())
        );
    }

    #[test]
    fn test_parse_legacy_aliases() {
        assert_eq!(parse_command("XPWD"), Command::Pwd);
        assert_eq!(parse_command("XCUP"), Command::Cdup);
        assert_eq!(parse_command("XCWD sub"), Command::Cwd("sub".to_string()));
        assert_eq!(parse_command("XMKD sub"), Command::Mkd("sub".to_string()));
        assert_eq!(parse_command("XRMD sub"), Command::Rmd("sub".to_string()));
    }

    #[test]
    fn test_parse_allows_empty_password() {
        assert_eq!(parse_command("PASS"), Command::Pass(String::new()));
        assert_eq!(parse_command("PASS "), Command::Pass(String::new()));
    }

    #[test]
    fn test_parse_unknown_keeps_line() {
        assert_eq!(
            parse_command("FROB x y"),
            Command::Unknown("FROB x y".to_string())
        );
    }

    #[test]
    fn test_parse_trims_line_endings() {
        assert_eq!(
            parse_command("  LIST  \r\n"),
            Command::List(String::new())
        );
    }
}
