//! OrCAD XML schematic export reader
//!
//! Elements are matched by local name so namespaced and plain exports read
//! the same way. Each `Page` becomes one [`SchematicPage`]; an export without
//! pages is read as a single page named after the document.

use crate::error::{ConvertError, Result};
use crate::geometry::Point;
use crate::mapping::names::power_net_name;
use crate::mapping::nets::reconstruct_nets;
use crate::model::{
    ComponentInstance, InstancePin, LabelKind, NetLabel, SchematicDesign, SchematicPage,
    SourcePlacement, Wire,
};
use roxmltree::{Document, Node};
use std::collections::{BTreeMap, HashSet};

/// Parse an OrCAD XML export.
///
/// `name` labels the design and the implicit page when the export has no
/// `Page` elements.
pub fn parse_schematic(name: &str, text: &str) -> Result<SchematicDesign> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();

    let page_nodes: Vec<Node> = root
        .descendants()
        .filter(|n| is_element(n, "Page"))
        .collect();

    let mut pages = Vec::with_capacity(page_nodes.len().max(1));
    if page_nodes.is_empty() {
        pages.push(parse_page(name.to_string(), root)?);
    } else {
        // Page names key output files and UUIDs
        let mut names = HashSet::new();
        for (i, node) in page_nodes.iter().enumerate() {
            let page_name = defn(*node)
                .and_then(|d| d.attribute("name"))
                .or_else(|| node.attribute("name"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("Page{}", i + 1));
            if !names.insert(page_name.clone()) {
                return Err(ConvertError::MalformedSchematic {
                    page: page_name,
                    element: format!("Page #{}", i + 1),
                    reason: "duplicate page name".to_string(),
                });
            }
            pages.push(parse_page(page_name, *node)?);
        }
    }

    log::debug!("Parsed {} page(s) from {}", pages.len(), name);
    Ok(SchematicDesign {
        name: name.to_string(),
        pages,
    })
}

fn is_element(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_element(n, name))
}

/// The `Defn` element that carries an OrCAD object's attributes
fn defn<'a, 'input>(node: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    child(node, "Defn")
}

/// `true` when the nearest enclosing element of interest is `ancestor`
fn inside(node: &Node, ancestor: &str) -> bool {
    node.ancestors().skip(1).any(|n| is_element(&n, ancestor))
}

fn non_empty<'a>(value: Option<&'a str>) -> Option<&'a str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_set(node: Node, attr: &str) -> bool {
    node.attribute(attr)
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Builds one page, numbering elements per kind for diagnostics
struct PageReader {
    page: String,
}

impl PageReader {
    fn malformed(&self, element: impl Into<String>, reason: impl Into<String>) -> ConvertError {
        ConvertError::MalformedSchematic {
            page: self.page.clone(),
            element: element.into(),
            reason: reason.into(),
        }
    }

    fn number(&self, node: Node, attr: &str, element: &str) -> Result<f64> {
        let raw = node
            .attribute(attr)
            .ok_or_else(|| self.malformed(element, format!("missing attribute '{attr}'")))?;
        raw.trim().parse().map_err(|_| {
            self.malformed(element, format!("attribute '{attr}' is not a number: '{raw}'"))
        })
    }

    fn point(&self, node: Node, x: &str, y: &str, element: &str) -> Result<Point> {
        Ok(Point::new(
            self.number(node, x, element)?,
            self.number(node, y, element)?,
        ))
    }

    fn instance(&self, node: Node, index: usize) -> Result<ComponentInstance> {
        let element = format!("PartInst #{index}");
        let designator = child(node, "Reference")
            .and_then(defn)
            .and_then(|d| non_empty(d.attribute("name")))
            .ok_or_else(|| self.malformed(&element, "missing reference designator"))?
            .to_string();
        let element = format!("PartInst {designator}");

        let definition = defn(node);
        let part_reference = ["pkgName", "libName", "name"]
            .iter()
            .find_map(|attr| {
                non_empty(definition.and_then(|d| d.attribute(*attr)))
                    .or_else(|| non_empty(node.attribute(*attr)))
            })
            .ok_or_else(|| self.malformed(&element, "missing part reference"))?
            .to_string();

        let value = child(node, "PartValue")
            .and_then(defn)
            .and_then(|d| non_empty(d.attribute("name")))
            .map(str::to_string);

        let placement = self.placement(node, &element)?;

        let mut properties = BTreeMap::new();
        for prop in node.children().filter(|n| is_element(n, "PartInstUserProp")) {
            if let Some(d) = defn(prop) {
                if let Some(key) = non_empty(d.attribute("name")) {
                    let val = d.attribute("val").unwrap_or_default();
                    properties.insert(key.to_string(), val.to_string());
                }
            }
        }

        let mut pins = Vec::new();
        for port in node
            .descendants()
            .filter(|n| is_element(n, "PortInstScalar"))
        {
            let Some(d) = defn(port) else {
                return Err(self.malformed(&element, "pin without definition"));
            };
            let number = non_empty(d.attribute("number"))
                .or_else(|| non_empty(d.attribute("pinNumber")))
                .or_else(|| non_empty(d.attribute("name")))
                .ok_or_else(|| self.malformed(&element, "pin without number or name"))?
                .to_string();
            let pin_element = format!("{element} pin {number}");
            if d.attribute("hotptX").is_none() || d.attribute("hotptY").is_none() {
                return Err(self.malformed(pin_element, "pin has no hot point"));
            }
            let hot = self.point(d, "hotptX", "hotptY", &pin_element)?;
            let name = non_empty(d.attribute("name")).unwrap_or(&number).to_string();
            pins.push(InstancePin { number, name, hot });
        }

        Ok(ComponentInstance {
            designator,
            part_reference,
            value,
            properties,
            placement,
            pins,
            element: index,
            resolved: None,
        })
    }

    /// Position, quarter-turn rotation and mirror of a part
    fn placement(&self, node: Node, element: &str) -> Result<SourcePlacement> {
        let location = [("Defn", "locX", "locY"), ("Inst", "locX", "locY"), ("Location", "x", "y")]
            .iter()
            .find_map(|(tag, x, y)| {
                child(node, tag)
                    .filter(|n| n.attribute(*x).is_some() && n.attribute(*y).is_some())
                    .map(|n| (n, *x, *y))
            });
        let Some((source, x, y)) = location else {
            return Err(self.malformed(element, "missing placement"));
        };
        let position = self.point(source, x, y, element)?;

        let mut rotation = match source
            .attribute("rotation")
            .or_else(|| source.attribute("orientation"))
        {
            Some(raw) => raw.trim().parse::<i64>().map_err(|_| {
                self.malformed(element, format!("rotation is not an integer: '{raw}'"))
            })?,
            None => 0,
        };
        let flip_x = is_set(source, "mirror") || is_set(source, "flipX");
        let flip_y = is_set(source, "flipY");
        // A vertical flip is a horizontal flip turned half way round.
        if flip_y && (0..4).contains(&rotation) {
            rotation = (rotation + 2) % 4;
        }

        Ok(SourcePlacement {
            position,
            rotation,
            mirror: flip_x != flip_y,
        })
    }

    fn wire(&self, node: Node, index: usize) -> Result<(Wire, Option<NetLabel>)> {
        let element = format!("WireScalar #{index}");
        let d = defn(node).ok_or_else(|| self.malformed(&element, "missing definition"))?;
        for attr in ["startX", "startY", "endX", "endY"] {
            if d.attribute(attr).is_none() {
                return Err(self.malformed(&element, format!("dangling wire, missing '{attr}'")));
            }
        }
        let wire = Wire {
            start: self.point(d, "startX", "startY", &element)?,
            end: self.point(d, "endX", "endY", &element)?,
        };

        // An alias on a wire names it at its own location, or at the start.
        let label = match child(node, "Alias").and_then(defn) {
            Some(alias) => {
                let name = non_empty(alias.attribute("name"))
                    .ok_or_else(|| self.malformed(&element, "wire alias without a name"))?;
                let position = if alias.attribute("locX").is_some() {
                    self.point(alias, "locX", "locY", &element)?
                } else {
                    wire.start
                };
                Some(NetLabel {
                    name: name.to_string(),
                    position,
                    kind: LabelKind::Local,
                })
            }
            None => None,
        };
        Ok((wire, label))
    }

    fn alias(&self, node: Node, index: usize) -> Result<NetLabel> {
        let element = format!("Alias #{index}");
        let d = defn(node).ok_or_else(|| self.malformed(&element, "missing definition"))?;
        let name = non_empty(d.attribute("name"))
            .ok_or_else(|| self.malformed(&element, "label without a name"))?;
        Ok(NetLabel {
            name: name.to_string(),
            position: self.point(d, "locX", "locY", &element)?,
            kind: LabelKind::Local,
        })
    }

    fn global(&self, node: Node, index: usize) -> Result<NetLabel> {
        let element = format!("Global #{index}");
        let d = defn(node).ok_or_else(|| self.malformed(&element, "missing definition"))?;
        let symbol = non_empty(d.attribute("symbolName")).map(str::to_string);
        let name = non_empty(d.attribute("name"))
            .or_else(|| symbol.as_deref().map(power_net_name))
            .ok_or_else(|| self.malformed(&element, "global without a name"))?;
        Ok(NetLabel {
            name: name.to_string(),
            position: self.point(d, "locX", "locY", &element)?,
            kind: LabelKind::Global { symbol },
        })
    }
}

fn parse_page(name: String, node: Node) -> Result<SchematicPage> {
    let reader = PageReader { page: name };
    let mut page = SchematicPage {
        name: reader.page.clone(),
        ..Default::default()
    };

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut next = |kind: &'static str| {
        let n = counts.entry(kind).or_default();
        *n += 1;
        *n
    };

    let mut seen = HashSet::new();
    for element in node.descendants().filter(|n| n.is_element()) {
        match element.tag_name().name() {
            "PartInst" => {
                let instance = reader.instance(element, next("PartInst"))?;
                if !seen.insert(instance.designator.clone()) {
                    return Err(reader.malformed(
                        format!("PartInst {}", instance.designator),
                        "duplicate designator",
                    ));
                }
                page.instances.push(instance);
            }
            "WireScalar" => {
                let (wire, label) = reader.wire(element, next("WireScalar"))?;
                page.wires.push(wire);
                page.labels.extend(label);
            }
            "Alias" if !inside(&element, "WireScalar") && !inside(&element, "PartInst") => {
                let label = reader.alias(element, next("Alias"))?;
                page.labels.push(label);
            }
            "Global" => {
                let label = reader.global(element, next("Global"))?;
                page.labels.push(label);
            }
            "Junction" => {
                let index = next("Junction");
                let element_name = format!("Junction #{index}");
                let d = defn(element)
                    .ok_or_else(|| reader.malformed(&element_name, "missing definition"))?;
                page.junctions
                    .push(reader.point(d, "locX", "locY", &element_name)?);
            }
            _ => {}
        }
    }

    page.nets = reconstruct_nets(&page);
    log::debug!(
        "Page '{}': {} instance(s), {} wire(s), {} label(s), {} net(s)",
        page.name,
        page.instances.len(),
        page.wires.len(),
        page.labels.len(),
        page.nets.len()
    );
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIVIDER: &str = r#"<?xml version="1.0"?>
<Design>
  <Page>
    <Defn name="MAIN"/>
    <PartInst>
      <Defn pkgName="R_0805" locX="100" locY="100" rotation="1"/>
      <Reference><Defn name="R1"/></Reference>
      <PartValue><Defn name="10k"/></PartValue>
      <PartInstUserProp><Defn name="Tolerance" val="1%"/></PartInstUserProp>
      <PortInstScalar><Defn name="1" hotptX="100" hotptY="90"/></PortInstScalar>
      <PortInstScalar><Defn name="2" hotptX="100" hotptY="110"/></PortInstScalar>
    </PartInst>
    <PartInst>
      <Defn pkgName="C_0603" locX="200" locY="100" flipY="1"/>
      <Reference><Defn name="C1"/></Reference>
      <PortInstScalar><Defn name="1" hotptX="200" hotptY="110"/></PortInstScalar>
      <PortInstScalar><Defn name="2" hotptX="200" hotptY="90"/></PortInstScalar>
    </PartInst>
    <WireScalar>
      <Defn startX="100" startY="90" endX="200" endY="90"/>
      <Alias><Defn name="VCC"/></Alias>
    </WireScalar>
    <Global><Defn symbolName="GND_POWER" locX="100" locY="110"/></Global>
    <Junction><Defn locX="150" locY="90"/></Junction>
  </Page>
</Design>"#;

    #[test]
    fn test_parse_page() {
        let design = parse_schematic("divider", DIVIDER).unwrap();
        assert_eq!(design.pages.len(), 1);
        let page = &design.pages[0];
        assert_eq!(page.name, "MAIN");
        assert_eq!(page.instances.len(), 2);

        let r1 = page.instance("R1").unwrap();
        assert_eq!(r1.part_reference, "R_0805");
        assert_eq!(r1.value.as_deref(), Some("10k"));
        assert_eq!(r1.properties["Tolerance"], "1%");
        assert_eq!(r1.placement.rotation, 1);
        assert!(!r1.placement.mirror);
        assert_eq!(r1.pins[1].hot, Point::new(100.0, 110.0));
        assert_eq!(r1.element, 1);

        let c1 = page.instance("C1").unwrap();
        assert_eq!(c1.placement.rotation, 2);
        assert!(c1.placement.mirror);

        assert_eq!(page.labels[0].name, "VCC");
        assert_eq!(page.labels[0].position, Point::new(100.0, 90.0));
        assert_eq!(page.labels[1].name, "GND");
        assert_eq!(
            page.labels[1].kind,
            LabelKind::Global {
                symbol: Some("GND_POWER".into())
            }
        );
        assert_eq!(page.junctions, vec![Point::new(150.0, 90.0)]);
    }

    #[test]
    fn test_nets_are_reconstructed() {
        let design = parse_schematic("divider", DIVIDER).unwrap();
        let page = &design.pages[0];
        let vcc = page.net("VCC").unwrap();
        assert!(vcc.has_pin("R1", "1"));
        assert!(vcc.has_pin("C1", "2"));
        // Only the power symbol touches R1.2
        let gnd = page.net("GND").unwrap();
        assert!(gnd.has_pin("R1", "2"));
        assert!(!gnd.has_pin("C1", "1"));
    }

    #[test]
    fn test_without_pages() {
        let xml = r#"<Schematic xmlns="http://www.cadence.com/orcad">
            <PartInst>
              <Inst locX="0" locY="0"/>
              <Defn libName="U_OPAMP"/>
              <Reference><Defn name="U1"/></Reference>
            </PartInst>
        </Schematic>"#;
        let design = parse_schematic("amp", xml).unwrap();
        assert_eq!(design.pages[0].name, "amp");
        assert_eq!(design.pages[0].instances[0].part_reference, "U_OPAMP");
    }

    fn malformed(xml: &str) -> (String, String) {
        match parse_schematic("bad", xml).unwrap_err() {
            ConvertError::MalformedSchematic {
                element, reason, ..
            } => (element, reason),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_instance_without_placement() {
        let (element, reason) = malformed(
            r#"<Page><PartInst><Defn pkgName="R"/>
               <Reference><Defn name="R7"/></Reference></PartInst></Page>"#,
        );
        assert_eq!(element, "PartInst R7");
        assert_eq!(reason, "missing placement");
    }

    #[test]
    fn test_dangling_wire() {
        let (element, reason) = malformed(
            r#"<Page><WireScalar><Defn startX="0" startY="0" endX="10"/></WireScalar></Page>"#,
        );
        assert_eq!(element, "WireScalar #1");
        assert!(reason.contains("endY"));
    }

    #[test]
    fn test_non_numeric_coordinate() {
        let (_, reason) = malformed(
            r#"<Page><Junction><Defn locX="ten" locY="0"/></Junction></Page>"#,
        );
        assert!(reason.contains("'ten'"));
    }

    #[test]
    fn test_duplicate_designator() {
        let part = r#"<PartInst><Defn pkgName="R" locX="0" locY="0"/>
            <Reference><Defn name="R1"/></Reference></PartInst>"#;
        let (element, reason) = malformed(&format!("<Page>{part}{part}</Page>"));
        assert_eq!(element, "PartInst R1");
        assert_eq!(reason, "duplicate designator");
    }

    #[test]
    fn test_pin_without_hot_point() {
        let (element, reason) = malformed(
            r#"<Page><PartInst><Defn pkgName="R" locX="0" locY="0"/>
               <Reference><Defn name="R1"/></Reference>
               <PortInstScalar><Defn name="1" hotptX="0"/></PortInstScalar></PartInst></Page>"#,
        );
        assert_eq!(element, "PartInst R1 pin 1");
        assert_eq!(reason, "pin has no hot point");
    }

    #[test]
    fn test_pages_are_read_in_order() {
        let xml = r#"<Design>
            <Page><Defn name="INPUT"/><Global><Defn name="VIN" locX="0" locY="0"/></Global></Page>
            <Page><Defn name="OUTPUT"/><Global><Defn name="VOUT" locX="0" locY="0"/></Global></Page>
        </Design>"#;
        let design = parse_schematic("amp", xml).unwrap();
        let names: Vec<&str> = design.pages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["INPUT", "OUTPUT"]);
        assert_eq!(design.pages[1].labels[0].name, "VOUT");
    }

    #[test]
    fn test_duplicate_page_name() {
        let (element, reason) = malformed(
            r#"<Design><Page><Defn name="MAIN"/></Page><Page><Defn name="MAIN"/></Page></Design>"#,
        );
        assert_eq!(element, "Page #2");
        assert_eq!(reason, "duplicate page name");
    }

    #[test]
    fn test_xml_syntax_error() {
        assert!(matches!(
            parse_schematic("bad", "<Page>"),
            Err(ConvertError::Xml(_))
        ));
    }
}
