use proptest::prelude::*;

use crate::ScalarDType;

proptest! {
    #[test]
    fn name_parses_back(dtype in super::generators::scalar_generator()) {
        prop_assert_eq!(dtype.name().parse::<ScalarDType>().unwrap(), dtype);
    }

    #[test]
    fn tag_round_trips_through_repr(dtype in super::generators::scalar_generator()) {
        prop_assert_eq!(ScalarDType::from_repr(dtype.tag()), Some(dtype));
    }

    #[test]
    fn int_and_float_are_disjoint(dtype in super::generators::scalar_generator()) {
        prop_assert!(!(dtype.is_int() && dtype.is_float()));
    }
}
