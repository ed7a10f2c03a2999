use std::{
    collections::BTreeMap,
    fmt::Write as _,
    io::{self, Write},
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};

use spin::Mutex;
use tracing::{level_filters::LevelFilter, span, Metadata, Subscriber};
use tracing_core::span::Current;

struct Span {
    metadata: &'static Metadata<'static>,
    fields: BTreeMap<&'static str, String>,
    parent: Option<span::Id>,
    refs: usize,
}

struct DebugVisitor(BTreeMap<&'static str, String>);

impl DebugVisitor {
    fn new() -> Self {
        DebugVisitor(BTreeMap::new())
    }
}

impl tracing::field::Visit for DebugVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn core::fmt::Debug) {
        self.0.insert(field.name(), format!("{:?}", value));
    }
}

struct LineVisitor<'a>(&'a mut String);

impl tracing::field::Visit for LineVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn core::fmt::Debug) {
        // message is recorded first for events built with the usual macros
        let _ = match field.name() {
            "message" => write!(self.0, "{:?} ", value),
            x => write!(self.0, "{}={:?}, ", x, value),
        };
    }
}

/// Prints each event on its own line, preceded by the chain of spans it happened in.
pub struct LineSubscriber<W> {
    out: Mutex<W>,
    max_level: LevelFilter,
    spans: Mutex<BTreeMap<u64, Span>>,
    next: AtomicU64,
    current_span: AtomicU64,
}

pub type StderrSubscriber = LineSubscriber<io::Stderr>;

impl StderrSubscriber {
    pub fn new(max_level: LevelFilter) -> Self {
        LineSubscriber::with_writer(io::stderr(), max_level)
    }
}

impl<W: Write> LineSubscriber<W> {
    pub fn with_writer(out: W, max_level: LevelFilter) -> Self {
        LineSubscriber {
            out: Mutex::new(out),
            max_level,
            spans: Mutex::new(BTreeMap::new()),
            next: AtomicU64::new(1),
            current_span: AtomicU64::new(0),
        }
    }

    fn get_current_span(&self) -> Option<span::Id> {
        NonZeroU64::new(self.current_span.load(Relaxed)).map(span::Id::from_non_zero_u64)
    }
}

fn write_span_with_parents(line: &mut String, spans: &BTreeMap<u64, Span>, span: &Span) {
    if let Some(parent) = span.parent.as_ref().and_then(|p| spans.get(&p.into_u64())) {
        write_span_with_parents(line, spans, parent);
    }

    let _ = write!(line, "in {} ", span.metadata.name());
    for (name, value) in span.fields.iter() {
        let _ = write!(line, "{}={} ", name, value);
    }
    line.push('\n');
}

impl<W: Write + Send + 'static> Subscriber for LineSubscriber<W> {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= &self.max_level
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        Some(self.max_level)
    }

    fn new_span(&self, attrs: &span::Attributes<'_>) -> span::Id {
        let mut visitor = DebugVisitor::new();
        attrs.record(&mut visitor);
        let span = Span {
            metadata: attrs.metadata(),
            fields: visitor.0,
            parent: attrs.parent().cloned().or(self.get_current_span()),
            refs: 1,
        };

        let id = self.next.fetch_add(1, Relaxed);
        self.spans.lock().insert(id, span);
        span::Id::from_u64(id)
    }

    fn record(&self, id: &span::Id, values: &span::Record<'_>) {
        let mut visitor = DebugVisitor::new();
        values.record(&mut visitor);
        if let Some(span) = self.spans.lock().get_mut(&id.into_u64()) {
            span.fields.append(&mut visitor.0);
        }
    }

    fn record_follows_from(&self, _id: &span::Id, _follows: &span::Id) {}

    fn event(&self, event: &tracing::Event<'_>) {
        let mut line = String::new();
        let level = event.metadata().level();
        let name = event.metadata().name().trim_start_matches("event ");
        {
            let spans = self.spans.lock();
            let span = event
                .parent()
                .cloned()
                .or(self.get_current_span())
                .and_then(|id| spans.get(&id.into_u64()));
            match span {
                Some(span) => {
                    write_span_with_parents(&mut line, &spans, span);
                    let _ = write!(line, "  \\ {}: {} ", level, name);
                }
                None => {
                    let _ = write!(line, "{}: {} ", level, name);
                }
            }
        }
        event.record(&mut LineVisitor(&mut line));
        line.push('\n');
        // nowhere left to report a failing log sink
        let _ = self.out.lock().write_all(line.as_bytes());
    }

    fn enter(&self, span: &span::Id) {
        self.current_span.store(span.into_u64(), Relaxed);
    }

    fn exit(&self, span: &span::Id) {
        let parent = self
            .spans
            .lock()
            .get(&span.into_u64())
            .and_then(|span| span.parent.clone());
        self.current_span
            .store(parent.as_ref().map(span::Id::into_u64).unwrap_or(0), Relaxed);
    }

    fn clone_span(&self, id: &span::Id) -> span::Id {
        if let Some(span) = self.spans.lock().get_mut(&id.into_u64()) {
            span.refs += 1;
        }
        id.clone()
    }

    fn try_close(&self, id: span::Id) -> bool {
        let mut spans = self.spans.lock();
        let closed = match spans.get_mut(&id.into_u64()) {
            Some(span) => {
                span.refs -= 1;
                span.refs == 0
            }
            None => false,
        };
        if closed {
            spans.remove(&id.into_u64());
        }
        closed
    }

    fn current_span(&self) -> Current {
        match self.current_span.load(Relaxed) {
            0 => Current::none(),
            id => match self.spans.lock().get(&id) {
                Some(span) => Current::new(span::Id::from_u64(id), span.metadata),
                None => Current::none(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    #[test]
    fn events_are_prefixed_with_their_spans() {
        let buffer = SharedBuffer::default();
        let subscriber = LineSubscriber::with_writer(buffer.clone(), LevelFilter::TRACE);
        tracing::subscriber::with_default(subscriber, || {
            let _outer = tracing::debug_span!("loading image", path = "prog").entered();
            tracing::info!(size = 72, "read header");
        });
        let text = buffer.text();
        assert!(text.contains("in loading image path=\"prog\""), "{text}");
        assert!(text.contains("  \\ INFO: "), "{text}");
        assert!(text.contains("read header size=72, "), "{text}");
    }

    #[test]
    fn events_above_max_level_are_dropped() {
        let buffer = SharedBuffer::default();
        let subscriber = LineSubscriber::with_writer(buffer.clone(), LevelFilter::WARN);
        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("quiet");
            tracing::warn!("loud");
        });
        let text = buffer.text();
        assert!(!text.contains("quiet"));
        assert!(text.starts_with("WARN: "), "{text}");
        assert!(text.contains("loud"));
    }
}
