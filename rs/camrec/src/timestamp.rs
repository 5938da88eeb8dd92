use std::cmp::Ordering;
use std::num::NonZeroU32;
use std::time::Duration;

/// The 90 kHz system clock used for MPEG-TS presentation timestamps.
pub const MPEG_TS_CLOCK: NonZeroU32 = NonZeroU32::new(90_000).unwrap();

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timestamp overflow")]
pub struct TimestampOverflow;

/// A presentation timestamp in a track's own clock.
///
/// All timestamps within a track are relative, so zero for one track is not zero for another.
/// The value is kept in the track's RTP clock units (ex. 90 kHz for video, the sample rate for audio)
/// so no precision is lost until the muxer maps it onto the container clock.
#[derive(Clone, Copy)]
pub struct Timestamp {
	ticks: i64,
	clock_rate: NonZeroU32,
}

impl Timestamp {
	pub const fn new(ticks: i64, clock_rate: NonZeroU32) -> Self {
		Self { ticks, clock_rate }
	}

	/// Get the raw value in units of [Self::clock_rate].
	pub const fn ticks(self) -> i64 {
		self.ticks
	}

	/// Get the clock rate in Hz.
	pub const fn clock_rate(self) -> NonZeroU32 {
		self.clock_rate
	}

	pub fn checked_add_ticks(self, ticks: i64) -> Result<Self, TimestampOverflow> {
		let ticks = self.ticks.checked_add(ticks).ok_or(TimestampOverflow)?;
		Ok(Self::new(ticks, self.clock_rate))
	}

	/// Convert to another clock rate, rounding toward negative infinity.
	pub fn rescale(self, clock_rate: NonZeroU32) -> Result<Self, TimestampOverflow> {
		if clock_rate == self.clock_rate {
			return Ok(self);
		}

		let value = self.ticks as i128 * clock_rate.get() as i128;
		let ticks = value.div_euclid(self.clock_rate.get() as i128);
		let ticks = i64::try_from(ticks).map_err(|_| TimestampOverflow)?;

		Ok(Self::new(ticks, clock_rate))
	}

	/// Get the value on the 90 kHz MPEG-TS clock.
	pub fn to_90khz(self) -> Result<i64, TimestampOverflow> {
		Ok(self.rescale(MPEG_TS_CLOCK)?.ticks)
	}

	/// Get the timestamp as microseconds.
	pub fn as_micros(self) -> i64 {
		let value = self.ticks as i128 * 1_000_000 / self.clock_rate.get() as i128;
		value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
	}

	/// Get the maximum of two timestamps.
	pub fn max(self, other: Self) -> Self {
		std::cmp::max(self, other)
	}

	fn cross(self, other: Self) -> (i128, i128) {
		(
			self.ticks as i128 * other.clock_rate.get() as i128,
			other.ticks as i128 * self.clock_rate.get() as i128,
		)
	}
}

impl PartialEq for Timestamp {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Timestamp {
	fn cmp(&self, other: &Self) -> Ordering {
		let (lhs, rhs) = self.cross(*other);
		lhs.cmp(&rhs)
	}
}

impl TryFrom<Timestamp> for Duration {
	type Error = TimestampOverflow;

	fn try_from(timestamp: Timestamp) -> Result<Self, Self::Error> {
		let micros = u64::try_from(timestamp.as_micros()).map_err(|_| TimestampOverflow)?;
		Ok(Duration::from_micros(micros))
	}
}

impl std::fmt::Debug for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}@{}Hz", self.ticks, self.clock_rate)
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}µs", self.as_micros())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const AUDIO: NonZeroU32 = NonZeroU32::new(48_000).unwrap();

	#[test]
	fn rescale_to_mpeg_ts() {
		let ts = Timestamp::new(48_000, AUDIO);
		assert_eq!(ts.to_90khz().unwrap(), 90_000);

		// One AAC frame is 1024 samples, which isn't a whole number of 90 kHz ticks.
		let ts = Timestamp::new(1024, AUDIO);
		assert_eq!(ts.to_90khz().unwrap(), 1920);

		let ts = Timestamp::new(1, AUDIO);
		assert_eq!(ts.to_90khz().unwrap(), 1);

		// Round toward negative infinity.
		let ts = Timestamp::new(-1, AUDIO);
		assert_eq!(ts.to_90khz().unwrap(), -2);
	}

	#[test]
	fn ordering_across_rates() {
		let video = Timestamp::new(90_000, MPEG_TS_CLOCK);
		let audio = Timestamp::new(48_000, AUDIO);
		assert_eq!(video, audio);

		let later = audio.checked_add_ticks(1).unwrap();
		assert!(later > video);
		assert_eq!(video.max(later), later);
	}

	#[test]
	fn overflow() {
		let ts = Timestamp::new(i64::MAX, AUDIO);
		assert_eq!(ts.checked_add_ticks(1), Err(TimestampOverflow));
		assert_eq!(ts.rescale(NonZeroU32::new(96_000).unwrap()), Err(TimestampOverflow));
		assert!(Duration::try_from(Timestamp::new(-5, AUDIO)).is_err());
	}

	#[test]
	fn duration() {
		let ts = Timestamp::new(135_000, MPEG_TS_CLOCK);
		assert_eq!(Duration::try_from(ts).unwrap(), Duration::from_millis(1500));
		assert_eq!(ts.to_string(), "1500000µs");
	}
}
