//! Line-oriented sink writing to any `io::Write` (stdout in production).

use crate::measurement::{Measurement, PersonId};
use crate::output::OutputFormatter;
use crate::sink::{MeasurementSink, SinkError};
use std::io::{self, Write};

pub struct WriterSink<W> {
    name: String,
    out: W,
    formatter: Box<dyn OutputFormatter>,
}

impl WriterSink<io::Stdout> {
    pub fn stdout(formatter: Box<dyn OutputFormatter>) -> Self {
        Self::new("stdout", io::stdout(), formatter)
    }
}

impl<W: Write> WriterSink<W> {
    pub fn new(name: impl Into<String>, out: W, formatter: Box<dyn OutputFormatter>) -> Self {
        Self {
            name: name.into(),
            out,
            formatter,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MeasurementSink for WriterSink<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&mut self, _person: PersonId, measurement: &Measurement) -> Result<(), SinkError> {
        let line = self.formatter.format(measurement)?;
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::influxdb::InfluxDbFormatter;
    use crate::output::json::JsonFormatter;
    use crate::test_utils::{body, weight};

    #[test]
    fn test_writes_one_line_per_measurement() {
        let formatter = Box::new(InfluxDbFormatter::new("scale".to_string()));
        let mut sink = WriterSink::new("buffer", Vec::<u8>::new(), formatter);

        sink.publish(1, &weight(1, 7500, 0)).unwrap();
        sink.publish(1, &body(1, 0)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("scale,kind=weight,person=1 "));
        assert!(lines[1].starts_with("scale,kind=body,person=1 "));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_json_lines() {
        let mut sink =
            WriterSink::new("buffer", Vec::<u8>::new(), Box::new(JsonFormatter::default()));
        sink.publish(2, &weight(2, 7500, 0)).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert!(out.starts_with("medisana/bs440/person2/weight {"));
    }

    #[test]
    fn test_write_error_is_reported() {
        struct Closed;
        impl Write for Closed {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut sink = WriterSink::new("closed", Closed, Box::new(JsonFormatter::default()));
        let err = sink.publish(1, &weight(1, 7500, 0)).unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
    }
}
