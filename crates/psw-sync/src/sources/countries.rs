//! Country reference data from REST Countries

use crate::config::ApiSettings;
use crate::engine::{ColumnType, FetchUnit, MappingRules, RequestSpec, SyncSource, TableSpec};

const COUNTRY_FIELDS: &str = "cca2,cca3,ccn3,cioc,car,tld,currencies,idd,name,flag";

pub struct CountriesSource {
    base_url: String,
    table: TableSpec,
    mapping: MappingRules,
}

impl CountriesSource {
    pub fn new(api: &ApiSettings) -> Self {
        // fips_code and geoname_id are not provided by the API and stay null
        let table = TableSpec::new("country_info")
            .key("iso_alpha2", ColumnType::Text)
            .column("iso_alpha3", ColumnType::Text)
            .column("iso_numeric", ColumnType::Text)
            .column("ioc_code", ColumnType::Text)
            .column("fips_code", ColumnType::Text)
            .column("license_plate", ColumnType::Text)
            .column("internet_tld", ColumnType::Text)
            .column("currency_code", ColumnType::Text)
            .column("calling_code", ColumnType::Text)
            .column("geoname_id", ColumnType::BigInt)
            .column("country_name", ColumnType::Text)
            .column("flag_emoji", ColumnType::Text);

        let mapping = MappingRules::new()
            .key("iso_alpha2", "cca2")
            .field("iso_alpha3", "cca3")
            .field("iso_numeric", "ccn3")
            .field("ioc_code", "cioc")
            .field("license_plate", "car.signs[0]")
            .field("internet_tld", "tld[0]")
            .field("currency_code", "currencies.$key")
            .combine("calling_code", "idd.root", "idd.suffixes[0]")
            .field("country_name", "name.common")
            .field("flag_emoji", "flag");

        Self {
            base_url: api.restcountries_base_url.trim_end_matches('/').to_string(),
            table,
            mapping,
        }
    }
}

impl SyncSource for CountriesSource {
    fn name(&self) -> &str {
        "countries"
    }

    fn table(&self) -> &TableSpec {
        &self.table
    }

    fn mapping(&self) -> &MappingRules {
        &self.mapping
    }

    fn units(&self) -> Vec<FetchUnit> {
        let request = RequestSpec::get(format!("{}/v3.1/all", self.base_url)).query("fields", COUNTRY_FIELDS);
        vec![FetchUnit::new("all countries", request)]
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::{normalize, Value};
    use serde_json::json;

    #[test]
    fn test_request_lists_fields() {
        let source = CountriesSource::new(&ApiSettings::default());
        let url = source.units()[0].request.url().unwrap();
        assert_eq!(url.host_str(), Some("restcountries.com"));
        assert_eq!(url.path(), "/v3.1/all");
        assert!(url.query().unwrap().starts_with("fields=cca2%2Ccca3"));
    }

    #[test]
    fn test_sweden() {
        let source = CountriesSource::new(&ApiSettings::default());
        let records = source
            .records(
                &source.units()[0],
                json!([{
                    "cca2": "SE", "cca3": "SWE", "ccn3": "752", "cioc": "SWE",
                    "car": {"signs": ["S"], "side": "right"},
                    "tld": [".se"],
                    "currencies": {"SEK": {"name": "Swedish krona", "symbol": "kr"}},
                    "idd": {"root": "+4", "suffixes": ["6"]},
                    "name": {"common": "Sweden", "official": "Kingdom of Sweden"},
                    "flag": "🇸🇪"
                }]),
            )
            .unwrap();
        let row = normalize(&records[0], source.mapping()).unwrap();
        assert_eq!(row.get("iso_numeric"), &Value::text("752"));
        assert_eq!(row.get("calling_code"), &Value::text("+46"));
        assert_eq!(row.get("currency_code"), &Value::text("SEK"));
        assert_eq!(row.get("flag_emoji"), &Value::text("🇸🇪"));
        assert_eq!(row.get("fips_code"), &Value::Null);
        assert_eq!(row.get("geoname_id"), &Value::Null);
    }
}
