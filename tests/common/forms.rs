//! Form models shared by the integration tests.

/// A repeat `/a/rep` with three instances, plus `cities` and `csv` secondary instances.
pub const REPEATS: &str = r#"<model xmlns="http://www.w3.org/2002/xforms" xmlns:orx="http://openrosa.org/xforms">
    <instance>
        <a id="repeats">
            <search>5</search>
            <rep><x>a</x><node>first</node></rep>
            <rep><x>b</x><node>second</node></rep>
            <rep><x>c</x><node>third</node></rep>
            <orx:meta><orx:instanceID>uuid:repeats</orx:instanceID></orx:meta>
        </a>
    </instance>
    <instance id="cities">
        <root><item><name>ams</name></item><item><name>rot</name></item></root>
    </instance>
    <instance id="csv">
        <root><item><col1>4</col1><col2>P</col2></item><item><col1>5</col1><col2>Q</col2></item></root>
    </instance>
</model>"#;

/// A repeat `/a/rep` that exists only as a template, holding a nested repeat `/a/rep/sub`.
pub const TEMPLATED: &str = r#"<model xmlns="http://www.w3.org/2002/xforms" xmlns:jr="http://openrosa.org/javarosa" xmlns:orx="http://openrosa.org/xforms">
    <instance>
        <a id="templated">
            <intro/>
            <rep jr:template="">
                <x>default</x>
                <sub jr:template=""><y>inner</y></sub>
            </rep>
            <outro/>
            <orx:meta><orx:instanceID/></orx:meta>
        </a>
    </instance>
</model>"#;

/// A typed field and a group, without repeats.
pub const FIELDS: &str = r#"<model>
    <instance>
        <a id="fields">
            <age>5</age>
            <grp><colors>red</colors></grp>
            <meta><instanceID>uuid:fields</instanceID></meta>
        </a>
    </instance>
</model>"#;
