/// A DOS date.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct Date {
    /// 1980 plus the 7-bit year field.
    year: u16,
    /// Month field as stored, zero on entries that never recorded a date.
    month: u8,
    /// Day field as stored.
    day: u8,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(transparent)]
pub(crate) struct DosDate {
    dos_date: u16,
}

impl Default for DosDate {
    fn default() -> Self {
        Self::BASE
    }
}

impl DosDate {
    /// The base DOS date value.
    /// This is the date 1980-01-01.
    pub const BASE: Self = Self { dos_date: 33 };

    #[must_use]
    #[inline]
    pub const fn new(dos_date: u16) -> Self {
        Self { dos_date }
    }

    #[must_use]
    #[inline]
    pub const fn dos_date(self) -> u16 {
        self.dos_date
    }
}

impl Date {
    const MIN_YEAR: u16 = 1980;

    #[must_use]
    #[expect(clippy::cast_possible_truncation, reason = "Fields are masked")]
    /// Creates a new `Date` from a DOS encoded date.
    pub(crate) const fn decode(dos_date: DosDate) -> Self {
        let dos_date = dos_date.dos_date();
        let year = (dos_date >> 9) + Self::MIN_YEAR;
        let month = ((dos_date >> 5) & 0xF) as u8;
        let day = (dos_date & 0x1F) as u8;
        Self { year, month, day }
    }

    #[must_use]
    #[inline]
    pub const fn year(&self) -> u16 {
        self.year
    }

    #[must_use]
    #[inline]
    pub const fn month(&self) -> u8 {
        self.month
    }

    #[must_use]
    #[inline]
    pub const fn day(&self) -> u8 {
        self.day
    }

    #[must_use]
    /// Returns the date as `[day, month, year low byte, year high byte]`.
    pub const fn to_quad(self) -> [u8; 4] {
        let year = self.year.to_le_bytes();
        [self.day, self.month, year[0], year[1]]
    }
}

/// A DOS time.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct Time {
    hour: u8,
    min: u8,
    /// Seconds at two-second resolution, as the time field stores them.
    sec: u8,
    /// Units of 10 ms on top of `sec`, up to 199.
    centis: u8,
}

impl Time {
    #[must_use]
    #[inline]
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    #[must_use]
    #[inline]
    pub const fn min(&self) -> u8 {
        self.min
    }

    #[must_use]
    #[inline]
    /// Returns the seconds, including the second carried by the 10 ms field.
    pub const fn sec(&self) -> u8 {
        self.sec + self.centis / 100
    }

    #[must_use]
    #[inline]
    pub const fn ms(&self) -> u16 {
        (self.centis % 100) as u16 * 10
    }

    #[must_use]
    /// Returns the time as `[hour, minute, second]`.
    ///
    /// Seconds come from the time field alone, so they are always even.
    pub const fn to_triple(self) -> [u8; 3] {
        [self.hour, self.min, self.sec]
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[repr(C, packed)]
pub(crate) struct DosTime {
    dos_time_hi_res: u8,
    dos_time: u16,
}

impl Default for DosTime {
    fn default() -> Self {
        Self::BASE
    }
}

impl DosTime {
    pub const BASE: Self = Self {
        dos_time_hi_res: 0,
        dos_time: 0,
    };

    #[must_use]
    #[inline]
    pub const fn new(dos_time: u16, dos_time_hi_res: u8) -> Self {
        Self {
            dos_time_hi_res,
            dos_time,
        }
    }

    #[must_use]
    #[inline]
    pub const fn dos_time(self) -> u16 {
        self.dos_time
    }

    #[must_use]
    #[inline]
    pub const fn dos_time_hi_res(self) -> u8 {
        self.dos_time_hi_res
    }
}

impl Time {
    #[must_use]
    #[expect(clippy::cast_possible_truncation, reason = "Fields are masked")]
    pub(crate) const fn decode(dos_time: DosTime) -> Self {
        let centis = dos_time.dos_time_hi_res();
        let dos_time = dos_time.dos_time();
        let hour = (dos_time >> 11) as u8;
        let min = ((dos_time >> 5) & 0x3F) as u8;
        let sec = ((dos_time & 0x1F) * 2) as u8;
        Self {
            hour,
            min,
            sec,
            centis,
        }
    }
}

/// A DOS date and time.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct DateTime {
    date: Date,
    time: Time,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) struct DosDateTime {
    dos_date: DosDate,
    dos_time: DosTime,
}

impl DosDateTime {
    #[must_use]
    #[inline]
    pub const fn new(dos_date: DosDate, dos_time: DosTime) -> Self {
        Self { dos_date, dos_time }
    }

    #[must_use]
    #[inline]
    pub const fn dos_date(self) -> DosDate {
        self.dos_date
    }

    #[must_use]
    #[inline]
    pub const fn dos_time(self) -> DosTime {
        self.dos_time
    }
}

impl DateTime {
    #[must_use]
    #[inline]
    pub const fn new(date: Date, time: Time) -> Self {
        Self { date, time }
    }

    #[must_use]
    pub(crate) const fn decode(dos_datetime: DosDateTime) -> Self {
        Self::new(
            Date::decode(dos_datetime.dos_date()),
            Time::decode(dos_datetime.dos_time()),
        )
    }

    #[must_use]
    #[inline]
    pub const fn date(&self) -> Date {
        self.date
    }

    #[must_use]
    #[inline]
    pub const fn time(&self) -> Time {
        self.time
    }
}
