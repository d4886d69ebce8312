//! Text renderings of TOTP configurations for bulk export.

use std::fmt;
use std::str::FromStr;

use crate::model::ModelError;
use crate::totp::TotpConfiguration;

/// Header line of the CSV export.
pub const CSV_HEADER: &str = "issuer,username,algorithm,digits,period,secret";

/// Output format of an export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma separated values with a header line.
    #[default]
    Csv,
    /// One `otpauth://` URI per line.
    Uri,
}

impl ExportFormat {
    /// The line written before any configuration, if the format has one.
    pub fn header(&self) -> Option<&'static str> {
        match self {
            ExportFormat::Csv => Some(CSV_HEADER),
            ExportFormat::Uri => None,
        }
    }

    /// Renders one configuration as a line, without the trailing newline.
    pub fn render(&self, config: &TotpConfiguration) -> Result<String, ModelError> {
        match self {
            ExportFormat::Csv => Ok(format!(
                "{},{},{},{},{},{}",
                config.issuer,
                config.username,
                config.algorithm,
                config.digits,
                config.period,
                config.secret_str()?
            )),
            ExportFormat::Uri => config.uri(),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("csv"),
            ExportFormat::Uri => f.write_str("uri"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "uri" | "uris" => Ok(ExportFormat::Uri),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totp::TotpAlgorithm;

    #[test]
    fn csv_row_follows_header_columns() {
        let config = TotpConfiguration::new("alice", "JBSWY3DPEHPK3PXP")
            .with_algorithm(TotpAlgorithm::Sha512)
            .with_digits(8);
        assert_eq!(ExportFormat::Csv.header(), Some(CSV_HEADER));
        assert_eq!(
            ExportFormat::Csv.render(&config).unwrap(),
            "Authelia,alice,SHA512,8,30,JBSWY3DPEHPK3PXP"
        );
    }

    #[test]
    fn uri_format_has_no_header() {
        let config = TotpConfiguration::new("alice", "JBSWY3DPEHPK3PXP");
        assert_eq!(ExportFormat::Uri.header(), None);
        assert!(
            ExportFormat::Uri
                .render(&config)
                .unwrap()
                .starts_with("otpauth://totp/Authelia:alice?algorithm=SHA1&digits=6")
        );
    }

    #[test]
    fn binary_secret_cannot_be_rendered() {
        let config = TotpConfiguration::new("alice", vec![0xff, 0xfe]);
        assert_eq!(
            ExportFormat::Csv.render(&config),
            Err(ModelError::SecretNotText)
        );
    }
}
