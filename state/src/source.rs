//! The uniform push-source type and the tagged union callers hand to the cache.

use crate::error::{Result, StateError};

use std::fmt;
use std::future::{self, Future};

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use futures_util::FutureExt;

/// The push-based stream every cache read and write resolves to.
///
/// A failure is terminal: once an `Err` has been yielded the stream completes.
pub type StateStream<T> = BoxStream<'static, Result<T>>;

/// Something the cache can turn into a [`StateStream`].
///
/// The caller decides which shape a value has; the cache never inspects a
/// value at runtime to guess whether it is deferred.
pub enum Source<T> {
  /// An already-resolved value.
  Value(T),
  /// A value that resolves once, later.
  Deferred(BoxFuture<'static, Result<T>>),
  /// A stream that may emit zero, one or many values over time.
  Stream(BoxStream<'static, Result<T>>),
}

impl<T> fmt::Debug for Source<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Source::Value(_) => f.write_str("Source::Value(..)"),
      Source::Deferred(_) => f.write_str("Source::Deferred(..)"),
      Source::Stream(_) => f.write_str("Source::Stream(..)"),
    }
  }
}

impl<T: Send + 'static> Source<T> {
  pub fn value(value: T) -> Self {
    Source::Value(value)
  }

  /// Wraps a fallible future. Its error is reported as
  /// [`StateError::SourceFailed`].
  pub fn deferred<F, E>(future: F) -> Self
  where
    F: Future<Output = std::result::Result<T, E>> + Send + 'static,
    E: fmt::Display,
  {
    Source::Deferred(
      future
        .map(|res| res.map_err(|e| StateError::SourceFailed(e.to_string())))
        .boxed(),
    )
  }

  pub fn deferred_ok<F>(future: F) -> Self
  where
    F: Future<Output = T> + Send + 'static,
  {
    Source::Deferred(future.map(Ok).boxed())
  }

  /// Wraps a fallible stream. Its errors are reported as
  /// [`StateError::SourceFailed`].
  pub fn stream<S, E>(stream: S) -> Self
  where
    S: Stream<Item = std::result::Result<T, E>> + Send + 'static,
    E: fmt::Display,
  {
    Source::Stream(
      stream
        .map(|res| res.map_err(|e| StateError::SourceFailed(e.to_string())))
        .boxed(),
    )
  }

  pub fn stream_ok<S>(stream: S) -> Self
  where
    S: Stream<Item = T> + Send + 'static,
  {
    Source::Stream(stream.map(Ok).boxed())
  }

  /// A source that fails immediately with `error`.
  pub fn failed(error: StateError) -> Self {
    Source::Deferred(future::ready(Err(error)).boxed())
  }

  /// `true` if the source emits at most once.
  pub fn is_single(&self) -> bool {
    !matches!(self, Source::Stream(_))
  }

  /// Normalizes the source into a [`StateStream`].
  pub fn into_stream(self) -> StateStream<T> {
    match self {
      Source::Value(value) => stream::once(future::ready(Ok(value))).boxed(),
      Source::Deferred(future) => stream::once(future).boxed(),
      Source::Stream(stream) => until_failure(stream),
    }
  }
}

/// Ends `stream` right after it yields its first failure.
pub(crate) fn until_failure<T: Send + 'static>(
  stream: BoxStream<'static, Result<T>>,
) -> StateStream<T> {
  stream
    .scan(false, |failed, item| {
      if *failed {
        return future::ready(None);
      }
      *failed = item.is_err();
      future::ready(Some(item))
    })
    .boxed()
}

/// A stream that yields `error` and completes.
pub(crate) fn failed_stream<T: Send + 'static>(error: StateError) -> StateStream<T> {
  stream::once(future::ready(Err(error))).boxed()
}

/// Drives a source of batches to completion and concatenates them.
pub(crate) async fn drain_batches<T: Send + 'static>(source: Source<Vec<T>>) -> Result<Vec<T>> {
  let mut batches = source.into_stream();
  let mut items = Vec::new();
  while let Some(batch) = batches.next().await {
    items.extend(batch?);
  }
  Ok(items)
}

/// Drives a source to completion, discarding its values.
pub(crate) async fn drain<T: Send + 'static>(source: Source<T>) -> Result<()> {
  let mut values = source.into_stream();
  while let Some(value) = values.next().await {
    value?;
  }
  Ok(())
}
