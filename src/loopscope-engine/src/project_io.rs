// Copyright 2026 The Loopscope Authors. All rights reserved.
// Use of this source code is governed by the Apache License,
// Version 2.0, that can be found in the LICENSE file.

//! The on-disk protobuf schema, as hand-written prost messages.  Field
//! tags are the compatibility contract: length-delimited tagged records,
//! unknown fields ignored on read.

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Dt {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(bool, tag = "2")]
    pub is_reciprocal: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum SimMethod {
    Euler = 0,
    RungeKutta4 = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SimSpecs {
    #[prost(double, tag = "1")]
    pub start: f64,
    #[prost(double, tag = "2")]
    pub stop: f64,
    #[prost(message, optional, tag = "3")]
    pub dt: Option<Dt>,
    #[prost(message, optional, tag = "4")]
    pub save_step: Option<Dt>,
    #[prost(enumeration = "SimMethod", tag = "5")]
    pub sim_method: i32,
    #[prost(string, optional, tag = "6")]
    pub time_units: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Dimension {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, repeated, tag = "2")]
    pub elements: Vec<String>,
}

pub mod graphical_function {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum Kind {
        Continuous = 0,
        Extrapolate = 1,
        Discrete = 2,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Scale {
        #[prost(double, tag = "1")]
        pub min: f64,
        #[prost(double, tag = "2")]
        pub max: f64,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GraphicalFunction {
    #[prost(enumeration = "graphical_function::Kind", tag = "1")]
    pub kind: i32,
    /// empty means "derive a uniform grid from the x scale"
    #[prost(double, repeated, tag = "2")]
    pub x_points: Vec<f64>,
    #[prost(double, repeated, tag = "3")]
    pub y_points: Vec<f64>,
    #[prost(message, optional, tag = "4")]
    pub x_scale: Option<graphical_function::Scale>,
    #[prost(message, optional, tag = "5")]
    pub y_scale: Option<graphical_function::Scale>,
}

pub mod equation {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Scalar {
        #[prost(string, tag = "1")]
        pub equation: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ApplyToAll {
        #[prost(string, repeated, tag = "1")]
        pub dimension_names: Vec<String>,
        #[prost(string, tag = "2")]
        pub equation: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Element {
        #[prost(string, tag = "1")]
        pub subscript: String,
        #[prost(string, tag = "2")]
        pub equation: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Arrayed {
        #[prost(string, repeated, tag = "1")]
        pub dimension_names: Vec<String>,
        #[prost(message, repeated, tag = "2")]
        pub elements: Vec<Element>,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Scalar(Scalar),
        #[prost(message, tag = "2")]
        ApplyToAll(ApplyToAll),
        #[prost(message, tag = "3")]
        Arrayed(Arrayed),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Equation {
    #[prost(oneof = "equation::Kind", tags = "1, 2, 3")]
    pub kind: Option<equation::Kind>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Stock {
    #[prost(string, tag = "1")]
    pub ident: String,
    #[prost(message, optional, tag = "2")]
    pub equation: Option<Equation>,
    #[prost(string, tag = "3")]
    pub documentation: String,
    #[prost(string, optional, tag = "4")]
    pub units: Option<String>,
    #[prost(string, repeated, tag = "5")]
    pub inflows: Vec<String>,
    #[prost(string, repeated, tag = "6")]
    pub outflows: Vec<String>,
    #[prost(bool, tag = "7")]
    pub non_negative: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Flow {
    #[prost(string, tag = "1")]
    pub ident: String,
    #[prost(message, optional, tag = "2")]
    pub equation: Option<Equation>,
    #[prost(string, tag = "3")]
    pub documentation: String,
    #[prost(string, optional, tag = "4")]
    pub units: Option<String>,
    #[prost(message, optional, tag = "5")]
    pub gf: Option<GraphicalFunction>,
    #[prost(bool, tag = "6")]
    pub non_negative: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Aux {
    #[prost(string, tag = "1")]
    pub ident: String,
    #[prost(message, optional, tag = "2")]
    pub equation: Option<Equation>,
    #[prost(string, tag = "3")]
    pub documentation: String,
    #[prost(string, optional, tag = "4")]
    pub units: Option<String>,
    #[prost(message, optional, tag = "5")]
    pub gf: Option<GraphicalFunction>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ModuleReference {
    #[prost(string, tag = "1")]
    pub src: String,
    #[prost(string, tag = "2")]
    pub dst: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Module {
    #[prost(string, tag = "1")]
    pub ident: String,
    #[prost(string, tag = "2")]
    pub model_name: String,
    #[prost(string, tag = "3")]
    pub documentation: String,
    #[prost(string, optional, tag = "4")]
    pub units: Option<String>,
    #[prost(message, repeated, tag = "5")]
    pub references: Vec<ModuleReference>,
}

pub mod variable {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum V {
        #[prost(message, tag = "1")]
        Stock(super::Stock),
        #[prost(message, tag = "2")]
        Flow(super::Flow),
        #[prost(message, tag = "3")]
        Aux(super::Aux),
        #[prost(message, tag = "4")]
        Module(super::Module),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Variable {
    #[prost(oneof = "variable::V", tags = "1, 2, 3, 4")]
    pub v: Option<variable::V>,
}

pub mod view_element {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum LabelSide {
        Top = 0,
        Left = 1,
        Center = 2,
        Bottom = 3,
        Right = 4,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Aux {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int32, tag = "2")]
        pub uid: i32,
        #[prost(double, tag = "3")]
        pub x: f64,
        #[prost(double, tag = "4")]
        pub y: f64,
        #[prost(enumeration = "LabelSide", tag = "5")]
        pub label_side: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Stock {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int32, tag = "2")]
        pub uid: i32,
        #[prost(double, tag = "3")]
        pub x: f64,
        #[prost(double, tag = "4")]
        pub y: f64,
        #[prost(enumeration = "LabelSide", tag = "5")]
        pub label_side: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FlowPoint {
        #[prost(double, tag = "1")]
        pub x: f64,
        #[prost(double, tag = "2")]
        pub y: f64,
        #[prost(int32, optional, tag = "3")]
        pub attached_to_uid: Option<i32>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Flow {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int32, tag = "2")]
        pub uid: i32,
        #[prost(double, tag = "3")]
        pub x: f64,
        #[prost(double, tag = "4")]
        pub y: f64,
        #[prost(enumeration = "LabelSide", tag = "5")]
        pub label_side: i32,
        #[prost(message, repeated, tag = "6")]
        pub points: Vec<FlowPoint>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FlowPoints {
        #[prost(message, repeated, tag = "1")]
        pub points: Vec<FlowPoint>,
    }

    pub mod link {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Shape {
            #[prost(bool, tag = "4")]
            Straight(bool),
            #[prost(double, tag = "5")]
            Arc(f64),
            #[prost(message, tag = "6")]
            MultiPoint(super::FlowPoints),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Link {
        #[prost(int32, tag = "1")]
        pub uid: i32,
        #[prost(int32, tag = "2")]
        pub from_uid: i32,
        #[prost(int32, tag = "3")]
        pub to_uid: i32,
        #[prost(oneof = "link::Shape", tags = "4, 5, 6")]
        pub shape: Option<link::Shape>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Module {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(int32, tag = "2")]
        pub uid: i32,
        #[prost(double, tag = "3")]
        pub x: f64,
        #[prost(double, tag = "4")]
        pub y: f64,
        #[prost(enumeration = "LabelSide", tag = "5")]
        pub label_side: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Alias {
        #[prost(int32, tag = "1")]
        pub uid: i32,
        #[prost(int32, tag = "2")]
        pub alias_of_uid: i32,
        #[prost(double, tag = "3")]
        pub x: f64,
        #[prost(double, tag = "4")]
        pub y: f64,
        #[prost(enumeration = "LabelSide", tag = "5")]
        pub label_side: i32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Cloud {
        #[prost(int32, tag = "1")]
        pub uid: i32,
        #[prost(int32, tag = "2")]
        pub flow_uid: i32,
        #[prost(double, tag = "3")]
        pub x: f64,
        #[prost(double, tag = "4")]
        pub y: f64,
    }

    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Element {
        #[prost(message, tag = "1")]
        Aux(Aux),
        #[prost(message, tag = "2")]
        Stock(Stock),
        #[prost(message, tag = "3")]
        Flow(Flow),
        #[prost(message, tag = "4")]
        Link(Link),
        #[prost(message, tag = "5")]
        Module(Module),
        #[prost(message, tag = "6")]
        Alias(Alias),
        #[prost(message, tag = "7")]
        Cloud(Cloud),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ViewElement {
    #[prost(oneof = "view_element::Element", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub element: Option<view_element::Element>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Rect {
    #[prost(double, tag = "1")]
    pub x: f64,
    #[prost(double, tag = "2")]
    pub y: f64,
    #[prost(double, tag = "3")]
    pub width: f64,
    #[prost(double, tag = "4")]
    pub height: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct View {
    #[prost(message, repeated, tag = "1")]
    pub elements: Vec<ViewElement>,
    #[prost(message, optional, tag = "2")]
    pub view_box: Option<Rect>,
    #[prost(double, tag = "3")]
    pub zoom: f64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Model {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub variables: Vec<Variable>,
    #[prost(message, repeated, tag = "3")]
    pub views: Vec<View>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Project {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, optional, tag = "2")]
    pub sim_specs: Option<SimSpecs>,
    #[prost(message, repeated, tag = "3")]
    pub dimensions: Vec<Dimension>,
    #[prost(message, repeated, tag = "4")]
    pub models: Vec<Model>,
}
