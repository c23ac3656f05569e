pub(crate) mod helpers;
mod mutual_exclusion;

#[cfg(feature = "stress")]
mod concurrency;
