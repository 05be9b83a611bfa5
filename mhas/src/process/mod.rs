/// Stateful config and frame conversion.
///
/// Provides the [`Converter`](convert::Converter) holding the packet label
/// and the last emitted configuration of one conversion session.
pub mod convert;

/// Whole track conversion.
///
/// Provides the [`FileConverter`](file::FileConverter) driving a
/// [`TrackReader`](track::TrackReader) into a [`TrackWriter`](track::TrackWriter).
pub mod file;

/// Output sample assembly for `mha` and `mhm` input.
pub mod sample;

/// Container collaborator interface.
pub mod track;
